// Root directory: lookup, slot allocation and in-place entry updates
//
// FAT12/16 keep the root in a fixed run of sectors after the FATs. FAT32
// keeps it in an ordinary cluster chain that grows when it runs out of slots.

use super::FatFileSystem;
use crate::fat_common::{
    classify_slot, Attributes, DirEntry, FatVariant, ShortName, SlotKind, DIR_ENTRY_ERASED,
    DIR_ENTRY_SIZE,
};
use kfat_core::{BlockDevice, FatError, FatResult};
use log::debug;

/// Location of one 32-byte slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirSlot {
    pub lba: u32,
    pub offset: usize,
}

impl<D: BlockDevice> FatFileSystem<D> {
    /// Sectors of the root directory in scan order.
    fn root_sectors(&self) -> FatResult<Vec<u32>> {
        let g = &self.geometry;
        match g.variant {
            FatVariant::Fat32 => {
                let clusters = self.fat.chain(g.root_cluster)?;
                Ok(clusters
                    .into_iter()
                    .flat_map(|c| {
                        let lba = g.cluster_to_lba(c);
                        lba..lba + g.sectors_per_cluster
                    })
                    .collect())
            }
            _ => Ok((g.first_root_dir_sector..g.first_root_dir_sector + g.root_dir_sectors).collect()),
        }
    }

    /// Walk live entries until `visit` returns true or the end marker is hit.
    fn scan_root<F>(&mut self, mut visit: F) -> FatResult<Option<(DirSlot, DirEntry)>>
    where
        F: FnMut(&DirEntry) -> bool,
    {
        let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
        for lba in self.root_sectors()? {
            self.device.read_sector(lba, &mut buf)?;
            for offset in (0..buf.len()).step_by(DIR_ENTRY_SIZE) {
                let raw = &buf[offset..offset + DIR_ENTRY_SIZE];
                match classify_slot(raw) {
                    SlotKind::End => return Ok(None),
                    SlotKind::Erased | SlotKind::LongName | SlotKind::VolumeLabel => continue,
                    SlotKind::Entry => {
                        let entry = DirEntry::parse(raw);
                        if visit(&entry) {
                            return Ok(Some((DirSlot { lba, offset }, entry)));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn find_slot(&mut self, name: &ShortName) -> FatResult<Option<(DirSlot, DirEntry)>> {
        self.scan_root(|entry| entry.name == *name)
    }

    pub(crate) fn lookup(&mut self, name: &str) -> FatResult<(DirSlot, DirEntry)> {
        let short = ShortName::parse(name)?;
        self.find_slot(&short)?
            .ok_or_else(|| FatError::NotFound(short.to_string()))
    }

    pub fn find_entry(&mut self, name: &str) -> FatResult<DirEntry> {
        Ok(self.lookup(name)?.1)
    }

    /// Live entries of the root directory in slot order.
    pub fn list_root(&mut self) -> FatResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        self.scan_root(|entry| {
            entries.push(entry.clone());
            false
        })?;
        Ok(entries)
    }

    /// Persist a new entry in the first unused slot.
    pub fn insert_entry(
        &mut self,
        name: &str,
        attributes: Attributes,
        first_cluster: u32,
        size: u32,
    ) -> FatResult<DirEntry> {
        self.ensure_writable()?;
        let short = ShortName::parse(name)?;
        if self.find_slot(&short)?.is_some() {
            return Err(FatError::DuplicateName(short.to_string()));
        }

        let entry = DirEntry::new(short, attributes, first_cluster, size);
        self.insert_record(&entry)?;
        Ok(entry)
    }

    pub(crate) fn insert_record(&mut self, entry: &DirEntry) -> FatResult<()> {
        let slot = match self.find_free_slot()? {
            Some(slot) => slot,
            None => self.grow_root()?,
        };
        self.write_record(slot, entry)?;
        debug!("Inserted {} at sector {} offset {}", entry.name, slot.lba, slot.offset);
        Ok(())
    }

    fn find_free_slot(&mut self) -> FatResult<Option<DirSlot>> {
        let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
        for lba in self.root_sectors()? {
            self.device.read_sector(lba, &mut buf)?;
            for offset in (0..buf.len()).step_by(DIR_ENTRY_SIZE) {
                if matches!(classify_slot(&buf[offset..]), SlotKind::End | SlotKind::Erased) {
                    return Ok(Some(DirSlot { lba, offset }));
                }
            }
        }
        Ok(None)
    }

    /// Add one zeroed cluster to a FAT32 root. Fixed roots are full for good.
    fn grow_root(&mut self) -> FatResult<DirSlot> {
        if self.geometry.variant != FatVariant::Fat32 {
            return Err(FatError::DirectoryFull);
        }

        let chain = self.fat.chain(self.geometry.root_cluster)?;
        let tail = *chain
            .last()
            .ok_or_else(|| FatError::CorruptChain("FAT32 root directory has no clusters".into()))?;
        let cluster = match self.fat.extend_chain(tail) {
            Ok(cluster) => cluster,
            Err(FatError::NoSpace) => return Err(FatError::DirectoryFull),
            Err(e) => return Err(e),
        };

        let zeroes = vec![0u8; self.geometry.bytes_per_cluster() as usize];
        if let Err(e) = self.write_cluster(cluster, &zeroes) {
            self.discard_fat_changes();
            return Err(e);
        }
        self.commit_fat()?;

        debug!("Root directory grew to {} clusters (added {})", chain.len() + 1, cluster);
        Ok(DirSlot {
            lba: self.geometry.cluster_to_lba(cluster),
            offset: 0,
        })
    }

    /// Rewrite the full 32-byte record with one sector read-modify-write.
    pub(crate) fn write_record(&mut self, slot: DirSlot, entry: &DirEntry) -> FatResult<()> {
        let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
        self.device.read_sector(slot.lba, &mut buf)?;
        entry.write_to(&mut buf[slot.offset..slot.offset + DIR_ENTRY_SIZE]);
        self.device.write_sector(slot.lba, &buf)
    }

    /// Point an existing entry at new contents. Refreshes its write time.
    pub fn update_entry(&mut self, name: &str, size: u32, first_cluster: u32) -> FatResult<DirEntry> {
        self.ensure_writable()?;
        let (slot, mut entry) = self.lookup(name)?;
        entry.file_size = size;
        entry.first_cluster = first_cluster;
        entry.touch();
        self.write_record(slot, &entry)?;
        Ok(entry)
    }

    /// Mark an entry erased. Its clusters are left to the caller.
    pub fn remove_entry(&mut self, name: &str) -> FatResult<DirEntry> {
        self.ensure_writable()?;
        let (slot, entry) = self.lookup(name)?;
        let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
        self.device.read_sector(slot.lba, &mut buf)?;
        buf[slot.offset] = DIR_ENTRY_ERASED;
        self.device.write_sector(slot.lba, &buf)?;
        debug!("Erased entry {}", entry.name);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::format_volume;
    use kfat_core::{FormatOptions, MemoryDevice};

    fn tiny_fat12(root_entries: u16) -> FatFileSystem<MemoryDevice> {
        let mut dev = MemoryDevice::new(512, 2880);
        let mut opts = FormatOptions::new("fat12");
        opts.root_entries = Some(root_entries);
        format_volume(&mut dev, &opts).unwrap();
        FatFileSystem::mount(dev).unwrap()
    }

    #[test]
    fn insert_then_find() {
        let mut fs = tiny_fat12(224);
        fs.insert_entry("hello.txt", Attributes::archive(), 0, 0).unwrap();
        let entry = fs.find_entry("HELLO.TXT").unwrap();
        assert_eq!(entry.name.to_string(), "HELLO.TXT");
        assert!(matches!(fs.find_entry("OTHER.TXT"), Err(FatError::NotFound(_))));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut fs = tiny_fat12(224);
        fs.insert_entry("A.TXT", Attributes::archive(), 0, 0).unwrap();
        assert!(matches!(
            fs.insert_entry("a.txt", Attributes::archive(), 0, 0),
            Err(FatError::DuplicateName(_))
        ));
    }

    #[test]
    fn fixed_root_fills_up() {
        let mut fs = tiny_fat12(16);
        for i in 0..16 {
            fs.insert_entry(&format!("F{}.TXT", i), Attributes::archive(), 0, 0).unwrap();
        }
        assert!(matches!(
            fs.insert_entry("LAST.TXT", Attributes::archive(), 0, 0),
            Err(FatError::DirectoryFull)
        ));
    }

    #[test]
    fn erased_slot_is_reused() {
        let mut fs = tiny_fat12(16);
        fs.insert_entry("A.TXT", Attributes::archive(), 0, 0).unwrap();
        fs.insert_entry("B.TXT", Attributes::archive(), 0, 0).unwrap();
        fs.remove_entry("A.TXT").unwrap();
        assert!(matches!(fs.find_entry("A.TXT"), Err(FatError::NotFound(_))));

        fs.insert_entry("C.TXT", Attributes::archive(), 0, 0).unwrap();
        let names: Vec<String> = fs.list_root().unwrap().iter().map(|e| e.name.to_string()).collect();
        assert_eq!(names, vec!["C.TXT", "B.TXT"]);
    }

    #[test]
    fn scan_stops_at_end_marker() {
        let mut fs = tiny_fat12(16);
        fs.insert_entry("A.TXT", Attributes::archive(), 0, 0).unwrap();
        fs.insert_entry("B.TXT", Attributes::archive(), 0, 0).unwrap();

        // Turn slot 0 into an end marker; B.TXT in slot 1 becomes unreachable.
        let root = fs.geometry.first_root_dir_sector;
        let mut buf = vec![0u8; 512];
        fs.device.read_sector(root, &mut buf).unwrap();
        buf[0] = 0;
        fs.device.write_sector(root, &buf).unwrap();

        assert!(matches!(fs.find_entry("B.TXT"), Err(FatError::NotFound(_))));
        assert!(fs.list_root().unwrap().is_empty());
    }

    #[test]
    fn update_rewrites_size_and_cluster() {
        let mut fs = tiny_fat12(16);
        fs.insert_entry("A.TXT", Attributes::archive(), 0, 0).unwrap();
        fs.update_entry("A.TXT", 1234, 7).unwrap();
        let entry = fs.find_entry("A.TXT").unwrap();
        assert_eq!(entry.file_size, 1234);
        assert_eq!(entry.first_cluster, 7);
        assert!(entry.attributes.contains(Attributes::ARCHIVE));
    }

    #[test]
    fn volume_label_entry_never_matches() {
        let mut dev = MemoryDevice::new(512, 2880);
        let mut opts = FormatOptions::new("fat12");
        opts.label = Some("DISK".to_string());
        format_volume(&mut dev, &opts).unwrap();
        let mut fs = FatFileSystem::mount(dev).unwrap();

        assert!(matches!(fs.find_entry("DISK"), Err(FatError::NotFound(_))));
        assert!(fs.list_root().unwrap().is_empty());
        assert_eq!(fs.info().label.as_deref(), Some("DISK"));
    }

    #[test]
    fn read_only_mount_rejects_inserts() {
        let mut dev = MemoryDevice::new(512, 2880);
        format_volume(&mut dev, &FormatOptions::new("fat12")).unwrap();
        let mut fs = FatFileSystem::mount_with_options(dev, kfat_core::MountOptions::read_only()).unwrap();
        assert!(matches!(
            fs.insert_entry("A.TXT", Attributes::archive(), 0, 0),
            Err(FatError::ReadOnly)
        ));
    }
}
