// File contents: reading and writing through cluster chains
//
// Every mutation follows the same order: clusters are allocated and their
// data written, the FAT is flushed, and only then is the directory entry
// written. Shrinking operations run the other way round (entry first, then
// clusters are released), so a failure never leaves an entry pointing at
// freed or unwritten clusters.

use super::FatFileSystem;
use crate::fat_common::{Attributes, DirEntry, ShortName};
use kfat_core::{BlockDevice, FatError, FatResult};
use log::debug;

fn clusters_for(len: u64, cluster_bytes: u32) -> u32 {
    ((len + cluster_bytes as u64 - 1) / cluster_bytes as u64) as u32
}

fn checked_size(len: usize) -> FatResult<u32> {
    u32::try_from(len).map_err(|_| FatError::InvalidInput(format!("{} bytes exceed the 4 GiB FAT file limit", len)))
}

impl<D: BlockDevice> FatFileSystem<D> {
    /// Whole contents of a root directory file.
    pub fn read_file(&mut self, name: &str) -> FatResult<Vec<u8>> {
        let entry = self.find_entry(name)?;
        if !entry.is_file() {
            return Err(FatError::InvalidInput(format!("{} is not a regular file", entry.name)));
        }

        let size = entry.file_size as usize;
        if entry.first_cluster == 0 {
            if size > 0 {
                return Err(FatError::CorruptChain(format!(
                    "{} has {} bytes but no clusters",
                    entry.name, size
                )));
            }
            return Ok(Vec::new());
        }

        let cluster_bytes = self.geometry.bytes_per_cluster() as usize;
        let chain = self.fat.chain(entry.first_cluster)?;
        let needed = clusters_for(size as u64, cluster_bytes as u32) as usize;
        if chain.len() < needed {
            return Err(FatError::CorruptChain(format!(
                "{} needs {} clusters but its chain has {}",
                entry.name,
                needed,
                chain.len()
            )));
        }

        let mut data = vec![0u8; needed * cluster_bytes];
        for (i, &cluster) in chain.iter().take(needed).enumerate() {
            self.read_cluster(cluster, &mut data[i * cluster_bytes..(i + 1) * cluster_bytes])?;
        }
        data.truncate(size);

        debug!("Read {} bytes from {} ({} clusters)", size, entry.name, needed);
        Ok(data)
    }

    /// Create a new file holding `content`. Always allocates at least one cluster.
    pub fn create_file(&mut self, name: &str, content: &[u8]) -> FatResult<DirEntry> {
        self.ensure_writable()?;
        let short = ShortName::parse(name)?;
        if self.find_slot(&short)?.is_some() {
            return Err(FatError::DuplicateName(short.to_string()));
        }
        let size = checked_size(content.len())?;

        let count = clusters_for(size as u64, self.geometry.bytes_per_cluster()).max(1);
        let chain = self.fat.allocate_chain(count)?;
        if let Err(e) = self.write_chain(&chain, 0, 0, content) {
            self.discard_fat_changes();
            return Err(e);
        }
        self.commit_fat()?;

        let entry = DirEntry::new(short, Attributes::archive(), chain[0], size);
        if let Err(e) = self.insert_record(&entry) {
            // Give the clusters back so a full directory does not leak space.
            self.fat.free_chain(chain[0])?;
            self.flush_fat()?;
            return Err(e);
        }

        debug!("Created {} with {} bytes in {} cluster(s)", entry.name, size, count);
        Ok(entry)
    }

    /// Replace the contents of an existing file.
    ///
    /// The new contents go into fresh clusters and the old chain is released
    /// only after the entry points at them. When the volume is too full for
    /// both chains at once, the old chain is released first and its clusters
    /// are reused. Fails with `NoSpace` before anything is touched when the
    /// new contents cannot fit even then.
    pub fn write_file(&mut self, name: &str, content: &[u8]) -> FatResult<DirEntry> {
        self.ensure_writable()?;
        let (slot, mut entry) = self.lookup(name)?;
        if !entry.is_file() {
            return Err(FatError::InvalidInput(format!("{} is not a regular file", entry.name)));
        }
        let size = checked_size(content.len())?;

        let needed = clusters_for(size as u64, self.geometry.bytes_per_cluster());
        let old_head = entry.first_cluster;
        let old_len = if old_head != 0 {
            self.fat.chain(old_head)?.len() as u32
        } else {
            0
        };
        let free = self.fat.free_cluster_count();
        if free + old_len < needed {
            return Err(FatError::NoSpace);
        }

        let reuse_old = free < needed;
        if reuse_old {
            debug!("Volume nearly full, rewriting {} over its own clusters", entry.name);
            self.fat.free_chain(old_head)?;
        }
        let chain = match self.fat.allocate_chain(needed) {
            Ok(chain) => chain,
            Err(e) => {
                self.discard_fat_changes();
                return Err(e);
            }
        };
        if let Err(e) = self.write_chain(&chain, 0, 0, content) {
            self.discard_fat_changes();
            return Err(e);
        }
        self.commit_fat()?;

        entry.first_cluster = chain.first().copied().unwrap_or(0);
        entry.file_size = size;
        entry.touch();
        if let Err(e) = self.write_record(slot, &entry) {
            if !reuse_old {
                if let Some(&head) = chain.first() {
                    self.fat.free_chain(head)?;
                    self.flush_fat()?;
                }
            }
            return Err(e);
        }

        if !reuse_old && old_head != 0 {
            self.fat.free_chain(old_head)?;
            self.flush_fat()?;
        }

        debug!(
            "Rewrote {} with {} bytes ({} -> {} clusters)",
            entry.name, size, old_len, needed
        );
        Ok(entry)
    }

    /// Add `content` at the end of a file, filling the slack of its last cluster first.
    pub fn append_file(&mut self, name: &str, content: &[u8]) -> FatResult<DirEntry> {
        self.ensure_writable()?;
        let (slot, mut entry) = self.lookup(name)?;
        if !entry.is_file() {
            return Err(FatError::InvalidInput(format!("{} is not a regular file", entry.name)));
        }
        if content.is_empty() {
            return Ok(entry);
        }

        let old_size = entry.file_size;
        let new_size = checked_size(old_size as usize + content.len())?;
        let cluster_bytes = self.geometry.bytes_per_cluster();

        let mut chain = if entry.first_cluster != 0 {
            self.fat.chain(entry.first_cluster)?
        } else {
            Vec::new()
        };
        let existing = chain.len();
        if existing < clusters_for(old_size as u64, cluster_bytes) as usize {
            return Err(FatError::CorruptChain(format!(
                "{} has {} bytes but only {} cluster(s)",
                entry.name, old_size, existing
            )));
        }
        let needed = clusters_for(new_size as u64, cluster_bytes) as usize;
        let extra = needed.saturating_sub(existing) as u32;
        if self.fat.free_cluster_count() < extra {
            return Err(FatError::NoSpace);
        }

        if extra > 0 {
            let grown = match chain.last() {
                Some(&tail) => self.extend_by(tail, extra),
                None => self.fat.allocate_chain(extra),
            };
            match grown {
                Ok(clusters) => chain.extend(clusters),
                Err(e) => {
                    self.discard_fat_changes();
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.write_chain(&chain, existing, old_size as usize, content) {
            self.discard_fat_changes();
            return Err(e);
        }
        self.commit_fat()?;

        entry.first_cluster = chain[0];
        entry.file_size = new_size;
        entry.touch();
        self.write_record(slot, &entry)?;

        debug!("Appended {} bytes to {} (now {})", content.len(), entry.name, new_size);
        Ok(entry)
    }

    fn extend_by(&mut self, tail: u32, count: u32) -> FatResult<Vec<u32>> {
        let mut added = Vec::with_capacity(count as usize);
        let mut tail = tail;
        for _ in 0..count {
            tail = self.fat.extend_chain(tail)?;
            added.push(tail);
        }
        Ok(added)
    }

    /// Shrink a file to `len` bytes and release the clusters it no longer needs.
    pub fn truncate_file(&mut self, name: &str, len: u32) -> FatResult<DirEntry> {
        self.ensure_writable()?;
        let (slot, mut entry) = self.lookup(name)?;
        if len > entry.file_size {
            return Err(FatError::InvalidInput(format!(
                "cannot grow {} from {} to {} bytes by truncation",
                entry.name, entry.file_size, len
            )));
        }
        if len == entry.file_size {
            return Ok(entry);
        }

        let keep = clusters_for(len as u64, self.geometry.bytes_per_cluster());
        let head = entry.first_cluster;

        entry.file_size = len;
        if keep == 0 {
            entry.first_cluster = 0;
        }
        entry.touch();
        self.write_record(slot, &entry)?;

        if head != 0 {
            let freed = self.fat.truncate_chain(head, keep)?;
            self.flush_fat()?;
            debug!("Truncated {} to {} bytes, freed {} cluster(s)", entry.name, len, freed);
        }
        Ok(entry)
    }

    /// Erase a file's entry and free its clusters.
    pub fn delete_file(&mut self, name: &str) -> FatResult<()> {
        self.ensure_writable()?;
        let entry = self.remove_entry(name)?;
        if entry.first_cluster != 0 {
            let freed = self.fat.free_chain(entry.first_cluster)?;
            self.flush_fat()?;
            debug!("Deleted {}, freed {} cluster(s)", entry.name, freed);
        }
        Ok(())
    }

    /// Write `data` at byte `offset` of the file laid out on `chain`.
    ///
    /// Clusters before `fresh_from` already hold file data and are
    /// read-modify-written when only partly covered; fresh clusters are
    /// zero padded.
    fn write_chain(&mut self, chain: &[u32], fresh_from: usize, offset: usize, data: &[u8]) -> FatResult<()> {
        if data.is_empty() {
            // New clusters still get zeroed so stale data never shows through.
            for &cluster in chain.iter().skip(fresh_from) {
                let zeroes = vec![0u8; self.geometry.bytes_per_cluster() as usize];
                self.write_cluster(cluster, &zeroes)?;
            }
            return Ok(());
        }

        let cluster_bytes = self.geometry.bytes_per_cluster() as usize;
        let end = offset + data.len();
        let first = offset / cluster_bytes;
        let last = (end - 1) / cluster_bytes;
        let mut buf = vec![0u8; cluster_bytes];

        for (idx, &cluster) in chain.iter().enumerate().take(last + 1).skip(first) {
            let cluster_start = idx * cluster_bytes;
            let lo = offset.max(cluster_start);
            let hi = end.min(cluster_start + cluster_bytes);
            let src = &data[lo - offset..hi - offset];

            if lo == cluster_start && hi == cluster_start + cluster_bytes {
                self.write_cluster(cluster, src)?;
                continue;
            }

            if idx < fresh_from {
                self.read_cluster(cluster, &mut buf)?;
            } else {
                buf.fill(0);
            }
            buf[lo - cluster_start..hi - cluster_start].copy_from_slice(src);
            self.write_cluster(cluster, &buf)?;
        }

        for &cluster in chain.iter().skip((last + 1).max(fresh_from)) {
            buf.fill(0);
            self.write_cluster(cluster, &buf)?;
        }
        Ok(())
    }
}
