// Cluster chain operations on top of the allocation table

use super::constants::FIRST_DATA_CLUSTER;
use super::fat_table::{FatEntry, FatTable};
use kfat_core::{FatError, FatResult};
use log::debug;

impl FatTable {
    /// Lowest free cluster, scanning up from cluster 2 without wrapping.
    pub fn find_free_cluster(&self) -> FatResult<u32> {
        self.find_free_from(FIRST_DATA_CLUSTER)
    }

    fn find_free_from(&self, start: u32) -> FatResult<u32> {
        (start.max(FIRST_DATA_CLUSTER)..=self.max_cluster)
            .find(|&c| self.read_raw(c) == 0)
            .ok_or(FatError::NoSpace)
    }

    /// Claim the lowest free cluster as a one-cluster chain.
    pub fn allocate(&mut self) -> FatResult<u32> {
        let cluster = self.find_free_cluster()?;
        self.claim(cluster)?;
        Ok(cluster)
    }

    fn claim(&mut self, cluster: u32) -> FatResult<()> {
        self.set_entry(cluster, FatEntry::end_of_chain(self.variant()))?;
        self.next_free_hint = cluster + 1;
        debug!("Allocated cluster {}", cluster);
        Ok(())
    }

    /// Allocate a cluster and link it after `tail`. Returns the new tail.
    pub fn extend_chain(&mut self, tail: u32) -> FatResult<u32> {
        let cluster = self.allocate()?;
        self.set_entry(tail, FatEntry::Next(cluster))?;
        Ok(cluster)
    }

    /// Allocate a linked chain of `count` clusters and return it head first.
    ///
    /// Fails with `NoSpace` before touching the table when too few clusters
    /// are free.
    pub fn allocate_chain(&mut self, count: u32) -> FatResult<Vec<u32>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if self.free_cluster_count() < count {
            return Err(FatError::NoSpace);
        }

        let mut chain = Vec::with_capacity(count as usize);
        let mut cursor = FIRST_DATA_CLUSTER;
        for _ in 0..count {
            // Everything below the cursor was just taken, so this matches a scan from 2.
            let cluster = self.find_free_from(cursor)?;
            self.claim(cluster)?;
            if let Some(&tail) = chain.last() {
                self.set_entry(tail, FatEntry::Next(cluster))?;
            }
            chain.push(cluster);
            cursor = cluster + 1;
        }
        Ok(chain)
    }

    /// Release every cluster of the chain starting at `head`. Returns how many were freed.
    ///
    /// Stops at a terminal, bad, free or out-of-range entry, so freeing a
    /// chain twice, or a chain that loops back on itself, terminates.
    pub fn free_chain(&mut self, head: u32) -> FatResult<u32> {
        let mut freed = 0;
        let mut cluster = head;

        while cluster >= FIRST_DATA_CLUSTER && cluster <= self.max_cluster {
            let entry = self.get_entry(cluster)?;
            // Bad and reserved clusters stay out of circulation.
            if !matches!(entry, FatEntry::Next(_) | FatEntry::EndOfChain(_)) {
                break;
            }
            self.set_entry(cluster, FatEntry::Free)?;
            freed += 1;
            match entry {
                FatEntry::Next(next) => cluster = next,
                _ => break,
            }
        }

        if freed > 0 {
            debug!("Freed {} cluster(s) starting at {}", freed, head);
        }
        Ok(freed)
    }

    /// Successor of `cluster`, or `None` at end of chain.
    pub fn next_cluster(&self, cluster: u32) -> FatResult<Option<u32>> {
        match self.get_entry(cluster)? {
            FatEntry::EndOfChain(_) => Ok(None),
            FatEntry::Bad => Err(FatError::BadCluster(cluster)),
            FatEntry::Next(next) if next >= FIRST_DATA_CLUSTER && next <= self.max_cluster => Ok(Some(next)),
            FatEntry::Next(next) => Err(FatError::CorruptChain(format!(
                "cluster {} links to out-of-range cluster {}",
                cluster, next
            ))),
            entry => Err(FatError::CorruptChain(format!(
                "cluster {} is inside a chain but marked {:?}",
                cluster, entry
            ))),
        }
    }

    /// Every cluster of the chain starting at `head`, in order.
    pub fn chain(&self, head: u32) -> FatResult<Vec<u32>> {
        if head < FIRST_DATA_CLUSTER || head > self.max_cluster {
            return Err(FatError::CorruptChain(format!("chain head {} out of range", head)));
        }

        let mut clusters = vec![head];
        let mut cluster = head;
        while let Some(next) = self.next_cluster(cluster)? {
            if clusters.len() as u32 >= self.total_clusters {
                return Err(FatError::CorruptChain(format!(
                    "chain from {} is longer than the volume (cycle?)",
                    head
                )));
            }
            clusters.push(next);
            cluster = next;
        }
        Ok(clusters)
    }

    /// Cut the chain after `keep` clusters and free the rest. Returns how many were freed.
    pub fn truncate_chain(&mut self, head: u32, keep: u32) -> FatResult<u32> {
        if keep == 0 {
            return self.free_chain(head);
        }
        let clusters = self.chain(head)?;
        if keep as usize >= clusters.len() {
            return Ok(0);
        }

        let new_tail = clusters[keep as usize - 1];
        let first_dropped = clusters[keep as usize];
        self.set_entry(new_tail, FatEntry::end_of_chain(self.variant()))?;
        self.free_chain(first_dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat_common::boot_sector::{BootSector, VolumeGeometry};
    use crate::fat_common::FatVariant;

    fn fat16_table(total_clusters_hint: u16) -> FatTable {
        // 1 reserved sector, 2 FATs of 40 sectors, 32 root sectors, 1 sector per cluster
        let mut buf = [0u8; 512];
        buf[11..13].copy_from_slice(&512u16.to_le_bytes());
        buf[13] = 1;
        buf[14..16].copy_from_slice(&1u16.to_le_bytes());
        buf[16] = 2;
        buf[17..19].copy_from_slice(&512u16.to_le_bytes());
        buf[19..21].copy_from_slice(&(113 + total_clusters_hint).to_le_bytes());
        buf[22..24].copy_from_slice(&40u16.to_le_bytes());
        buf[510] = 0x55;
        buf[511] = 0xAA;
        let g = VolumeGeometry::from_boot_sector(&BootSector::parse(&buf).unwrap()).unwrap();
        FatTable::blank(&g)
    }

    fn small_fat12() -> FatTable {
        let mut buf = [0u8; 512];
        buf[11..13].copy_from_slice(&512u16.to_le_bytes());
        buf[13] = 1;
        buf[14..16].copy_from_slice(&1u16.to_le_bytes());
        buf[16] = 1;
        buf[17..19].copy_from_slice(&16u16.to_le_bytes());
        buf[19..21].copy_from_slice(&14u16.to_le_bytes()); // 1 + 1 + 1 + 11 data sectors
        buf[22..24].copy_from_slice(&1u16.to_le_bytes());
        buf[510] = 0x55;
        buf[511] = 0xAA;
        let g = VolumeGeometry::from_boot_sector(&BootSector::parse(&buf).unwrap()).unwrap();
        FatTable::blank(&g)
    }

    /// Table at the cluster limit of its variant: 1 reserved sector, one FAT,
    /// one root sector, one sector per cluster.
    fn table_at_limit(total_clusters: u32, sectors_per_fat: u16) -> FatTable {
        let total_sectors = 1 + sectors_per_fat as u32 + 1 + total_clusters;
        let mut buf = [0u8; 512];
        buf[11..13].copy_from_slice(&512u16.to_le_bytes());
        buf[13] = 1;
        buf[14..16].copy_from_slice(&1u16.to_le_bytes());
        buf[16] = 1;
        buf[17..19].copy_from_slice(&16u16.to_le_bytes());
        buf[22..24].copy_from_slice(&sectors_per_fat.to_le_bytes());
        buf[32..36].copy_from_slice(&total_sectors.to_le_bytes());
        buf[510] = 0x55;
        buf[511] = 0xAA;
        let g = VolumeGeometry::from_boot_sector(&BootSector::parse(&buf).unwrap()).unwrap();
        assert_eq!(g.total_clusters, total_clusters);
        FatTable::blank(&g)
    }

    #[test]
    fn fat12_chain_reaches_highest_clusters() {
        let mut fat = table_at_limit(4084, 12);
        assert_eq!(fat.variant(), FatVariant::Fat12);
        assert_eq!(fat.max_cluster, 0xFF5);

        fat.set_entry(0xFEF, FatEntry::Next(0xFF0)).unwrap();
        fat.set_entry(0xFF0, FatEntry::Next(0xFF5)).unwrap();
        fat.set_entry(0xFF5, FatEntry::end_of_chain(FatVariant::Fat12)).unwrap();
        assert_eq!(fat.chain(0xFEF).unwrap(), vec![0xFEF, 0xFF0, 0xFF5]);
        assert_eq!(fat.free_chain(0xFEF).unwrap(), 3);

        let free = fat.free_cluster_count();
        assert_eq!(free, 4084);
        let chain = fat.allocate_chain(free).unwrap();
        assert_eq!(chain.last().copied(), Some(0xFF5));
        assert_eq!(fat.chain(chain[0]).unwrap(), chain);
        assert_eq!(fat.free_chain(chain[0]).unwrap(), 4084);
        assert_eq!(fat.free_cluster_count(), 4084);
    }

    #[test]
    fn fat16_chain_reaches_highest_clusters() {
        let mut fat = table_at_limit(65524, 256);
        assert_eq!(fat.variant(), FatVariant::Fat16);
        assert_eq!(fat.max_cluster, 0xFFF5);

        fat.set_entry(0xFFEF, FatEntry::Next(0xFFF0)).unwrap();
        fat.set_entry(0xFFF0, FatEntry::Next(0xFFF5)).unwrap();
        fat.set_entry(0xFFF5, FatEntry::end_of_chain(FatVariant::Fat16)).unwrap();
        assert_eq!(fat.next_cluster(0xFFF0).unwrap(), Some(0xFFF5));
        assert_eq!(fat.chain(0xFFEF).unwrap(), vec![0xFFEF, 0xFFF0, 0xFFF5]);
        assert_eq!(fat.free_chain(0xFFEF).unwrap(), 3);
        assert_eq!(fat.free_cluster_count(), 65524);
    }

    #[test]
    fn link_past_last_cluster_is_corrupt() {
        let mut fat = table_at_limit(4084, 12);
        fat.set_entry(2, FatEntry::Next(0xFF6)).unwrap();
        assert!(matches!(fat.next_cluster(2), Err(FatError::CorruptChain(_))));
    }

    #[test]
    fn allocate_marks_end_of_chain() {
        let mut fat = small_fat12();
        let c = fat.allocate().unwrap();
        assert_eq!(c, 2);
        assert_eq!(fat.get_entry(c).unwrap(), FatEntry::EndOfChain(0xFFF));
        assert_ne!(fat.find_free_cluster().unwrap(), c);
    }

    #[test]
    fn allocation_runs_out() {
        let mut fat = small_fat12();
        for _ in 0..11 {
            fat.allocate().unwrap();
        }
        assert!(matches!(fat.allocate(), Err(FatError::NoSpace)));
        assert!(matches!(fat.find_free_cluster(), Err(FatError::NoSpace)));
    }

    #[test]
    fn extend_links_tail() {
        let mut fat = small_fat12();
        let head = fat.allocate().unwrap();
        let tail = fat.extend_chain(head).unwrap();
        assert_eq!(fat.next_cluster(head).unwrap(), Some(tail));
        assert_eq!(fat.next_cluster(tail).unwrap(), None);
        assert_eq!(fat.chain(head).unwrap(), vec![head, tail]);
    }

    #[test]
    fn free_chain_is_idempotent() {
        let mut fat = fat16_table(5000);
        let chain = fat.allocate_chain(4).unwrap();
        let free_before = fat.free_cluster_count();

        assert_eq!(fat.free_chain(chain[0]).unwrap(), 4);
        for &c in &chain {
            assert_eq!(fat.get_entry(c).unwrap(), FatEntry::Free);
        }
        assert_eq!(fat.free_cluster_count(), free_before + 4);

        assert_eq!(fat.free_chain(chain[0]).unwrap(), 0);
        assert_eq!(fat.free_cluster_count(), free_before + 4);
    }

    #[test]
    fn free_chain_stops_on_a_cycle() {
        let mut fat = fat16_table(5000);
        fat.set_entry(2, FatEntry::Next(3)).unwrap();
        fat.set_entry(3, FatEntry::Next(2)).unwrap();
        assert_eq!(fat.free_chain(2).unwrap(), 2);
    }

    #[test]
    fn cycles_are_reported_as_corrupt() {
        let mut fat = fat16_table(5000);
        fat.set_entry(2, FatEntry::Next(3)).unwrap();
        fat.set_entry(3, FatEntry::Next(2)).unwrap();
        assert!(matches!(fat.chain(2), Err(FatError::CorruptChain(_))));
    }

    #[test]
    fn bad_cluster_is_distinct_from_end_of_chain() {
        let mut fat = fat16_table(5000);
        fat.set_entry(2, FatEntry::Next(3)).unwrap();
        fat.set_entry(3, FatEntry::Bad).unwrap();
        assert_eq!(fat.next_cluster(2).unwrap(), Some(3));
        assert!(matches!(fat.next_cluster(3), Err(FatError::BadCluster(3))));
        assert!(matches!(fat.chain(2), Err(FatError::BadCluster(3))));
    }

    #[test]
    fn free_successor_is_corrupt() {
        let mut fat = fat16_table(5000);
        fat.set_entry(2, FatEntry::Next(9)).unwrap();
        assert!(matches!(fat.next_cluster(2), Err(FatError::CorruptChain(_))));
    }

    #[test]
    fn truncate_keeps_prefix() {
        let mut fat = fat16_table(5000);
        assert_eq!(fat.variant(), FatVariant::Fat16);
        let chain = fat.allocate_chain(5).unwrap();
        assert_eq!(fat.truncate_chain(chain[0], 2).unwrap(), 3);
        assert_eq!(fat.chain(chain[0]).unwrap(), chain[..2].to_vec());
        assert_eq!(fat.get_entry(chain[1]).unwrap(), FatEntry::EndOfChain(0xFFFF));
        assert_eq!(fat.get_entry(chain[4]).unwrap(), FatEntry::Free);
        assert_eq!(fat.truncate_chain(chain[0], 10).unwrap(), 0);
    }

    #[test]
    fn allocate_chain_fails_without_touching_table() {
        let mut fat = small_fat12();
        let free = fat.free_cluster_count();
        assert!(matches!(fat.allocate_chain(free + 1), Err(FatError::NoSpace)));
        assert_eq!(fat.free_cluster_count(), free);
        assert_eq!(fat.find_free_cluster().unwrap(), 2);
    }

    #[test]
    fn allocate_chain_skips_used_clusters() {
        let mut fat = fat16_table(5000);
        fat.set_entry(3, FatEntry::end_of_chain(FatVariant::Fat16)).unwrap();
        let chain = fat.allocate_chain(3).unwrap();
        assert_eq!(chain, vec![2, 4, 5]);
    }
}
