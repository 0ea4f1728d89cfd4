// In-memory allocation table with dirty-sector write back

use super::boot_sector::VolumeGeometry;
use super::constants::*;
use super::FatVariant;
use byteorder::{ByteOrder, LittleEndian};
use kfat_core::{BlockDevice, FatError, FatResult};
use log::{debug, warn};
use std::collections::BTreeSet;

/// Decoded value of one allocation-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Reserved,
    Next(u32),
    Bad,
    /// Terminal entry; the raw on-disk value is kept so it can be rewritten verbatim.
    EndOfChain(u32),
}

impl FatEntry {
    /// Values between the last data cluster and the bad marker decode as
    /// `Next`; whether a link is in range depends on the volume, not the variant.
    pub fn decode(raw: u32, variant: FatVariant) -> Self {
        match raw {
            FAT_FREE => FatEntry::Free,
            FAT_RESERVED => FatEntry::Reserved,
            v if v >= variant.end_of_chain_min() => FatEntry::EndOfChain(v),
            v if v == variant.bad_marker() => FatEntry::Bad,
            v => FatEntry::Next(v),
        }
    }

    pub fn encode(&self, variant: FatVariant) -> u32 {
        match *self {
            FatEntry::Free => FAT_FREE,
            FatEntry::Reserved => FAT_RESERVED,
            FatEntry::Next(cluster) => cluster,
            FatEntry::Bad => variant.bad_marker(),
            FatEntry::EndOfChain(raw) => raw,
        }
    }

    /// The variant's standard end-of-chain marker.
    pub fn end_of_chain(variant: FatVariant) -> Self {
        FatEntry::EndOfChain(variant.end_of_chain())
    }

    pub fn is_free(&self) -> bool {
        matches!(self, FatEntry::Free)
    }
}

/// Cached copy of FAT #0 for one mounted volume.
///
/// All reads and writes go to the cache; `flush` writes the sectors touched
/// since the last flush to every FAT copy on the device.
#[derive(Debug)]
pub struct FatTable {
    variant: FatVariant,
    bytes_per_sector: usize,
    first_fat_sector: u32,
    sectors_per_fat: u32,
    num_fats: u32,
    pub(crate) max_cluster: u32,
    pub(crate) total_clusters: u32,
    data: Vec<u8>,
    dirty: BTreeSet<u32>,
    free_clusters: u32,
    pub(crate) next_free_hint: u32,
}

impl FatTable {
    /// An all-free table for a volume about to be formatted. Every sector starts dirty.
    pub fn blank(geometry: &VolumeGeometry) -> Self {
        let mut table = Self::with_data(geometry, vec![0u8; geometry.fat_size_bytes()]);
        table.dirty = (0..geometry.sectors_per_fat).collect();
        table
    }

    /// Read FAT #0 from the device; other copies are compared and a mismatch is logged.
    pub fn load<D: BlockDevice>(device: &mut D, geometry: &VolumeGeometry) -> FatResult<Self> {
        let mut data = vec![0u8; geometry.fat_size_bytes()];
        device.read_sectors(geometry.first_fat_sector, &mut data)?;

        if geometry.num_fats > 1 {
            let mut mirror = vec![0u8; data.len()];
            device.read_sectors(geometry.first_fat_sector + geometry.sectors_per_fat, &mut mirror)?;
            if mirror != data {
                warn!("FAT copies disagree; using the first copy");
            }
        }

        let table = Self::with_data(geometry, data);
        debug!(
            "Loaded {} FAT: {} sectors, {} of {} clusters free",
            table.variant, geometry.sectors_per_fat, table.free_clusters, table.total_clusters
        );
        Ok(table)
    }

    fn with_data(geometry: &VolumeGeometry, data: Vec<u8>) -> Self {
        let mut table = FatTable {
            variant: geometry.variant,
            bytes_per_sector: geometry.bytes_per_sector as usize,
            first_fat_sector: geometry.first_fat_sector,
            sectors_per_fat: geometry.sectors_per_fat,
            num_fats: geometry.num_fats,
            max_cluster: geometry.max_cluster(),
            total_clusters: geometry.total_clusters,
            data,
            dirty: BTreeSet::new(),
            free_clusters: 0,
            next_free_hint: FIRST_DATA_CLUSTER,
        };
        table.free_clusters = (FIRST_DATA_CLUSTER..=table.max_cluster)
            .filter(|&c| table.read_raw(c) == FAT_FREE)
            .count() as u32;
        table
    }

    pub fn variant(&self) -> FatVariant {
        self.variant
    }

    pub fn free_cluster_count(&self) -> u32 {
        self.free_clusters
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn get_entry(&self, cluster: u32) -> FatResult<FatEntry> {
        self.check_cluster(cluster)?;
        Ok(FatEntry::decode(self.read_raw(cluster), self.variant))
    }

    pub fn set_entry(&mut self, cluster: u32, entry: FatEntry) -> FatResult<()> {
        self.check_cluster(cluster)?;
        let was_free = self.read_raw(cluster) == FAT_FREE;
        let value = entry.encode(self.variant);
        self.write_raw(cluster, value);

        match (was_free, value == FAT_FREE) {
            (true, false) => self.free_clusters -= 1,
            (false, true) => self.free_clusters += 1,
            _ => {}
        }
        Ok(())
    }

    fn check_cluster(&self, cluster: u32) -> FatResult<()> {
        if cluster < FIRST_DATA_CLUSTER || cluster > self.max_cluster {
            return Err(FatError::InvalidInput(format!(
                "cluster {} outside the data range 2..={}",
                cluster, self.max_cluster
            )));
        }
        Ok(())
    }

    /// Raw entry value; FAT32 reserved high bits are masked off.
    pub(crate) fn read_raw(&self, cluster: u32) -> u32 {
        let off = self.variant.entry_offset(cluster);
        match self.variant {
            FatVariant::Fat12 => {
                let word = LittleEndian::read_u16(&self.data[off..off + 2]);
                if cluster & 1 == 1 {
                    (word >> 4) as u32
                } else {
                    (word & 0x0FFF) as u32
                }
            }
            FatVariant::Fat16 => LittleEndian::read_u16(&self.data[off..off + 2]) as u32,
            FatVariant::Fat32 | FatVariant::ExFat => {
                LittleEndian::read_u32(&self.data[off..off + 4]) & FAT32_ENTRY_MASK
            }
        }
    }

    /// Store a raw value, leaving neighbouring FAT12 nibbles and FAT32 high bits intact.
    pub(crate) fn write_raw(&mut self, cluster: u32, value: u32) {
        let off = self.variant.entry_offset(cluster);
        let width = match self.variant {
            FatVariant::Fat12 => {
                let word = LittleEndian::read_u16(&self.data[off..off + 2]);
                let value = (value & 0x0FFF) as u16;
                let packed = if cluster & 1 == 1 {
                    (word & 0x000F) | (value << 4)
                } else {
                    (word & 0xF000) | value
                };
                LittleEndian::write_u16(&mut self.data[off..off + 2], packed);
                2
            }
            FatVariant::Fat16 => {
                LittleEndian::write_u16(&mut self.data[off..off + 2], value as u16);
                2
            }
            FatVariant::Fat32 | FatVariant::ExFat => {
                let old = LittleEndian::read_u32(&self.data[off..off + 4]);
                let packed = (old & !FAT32_ENTRY_MASK) | (value & FAT32_ENTRY_MASK);
                LittleEndian::write_u32(&mut self.data[off..off + 4], packed);
                4
            }
        };

        self.dirty.insert((off / self.bytes_per_sector) as u32);
        self.dirty.insert(((off + width - 1) / self.bytes_per_sector) as u32);
    }

    /// Write dirty sectors to FAT #0 and, when `mirror` is set, to every other copy.
    ///
    /// A sector stays dirty until all of its copies have been written, so a
    /// failed flush can be retried.
    pub fn flush<D: BlockDevice>(&mut self, device: &mut D, mirror: bool) -> FatResult<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let copies = if mirror { self.num_fats } else { 1 };
        let pending: Vec<u32> = self.dirty.iter().copied().collect();

        for idx in pending {
            let start = idx as usize * self.bytes_per_sector;
            let sector = &self.data[start..start + self.bytes_per_sector];
            for copy in 0..copies {
                let lba = self.first_fat_sector + copy * self.sectors_per_fat + idx;
                device.write_sector(lba, sector)?;
            }
            self.dirty.remove(&idx);
        }

        debug!("Flushed FAT to {} cop{}", copies, if copies == 1 { "y" } else { "ies" });
        Ok(())
    }
}
