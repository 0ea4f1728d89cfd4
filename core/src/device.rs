// Sector-addressable block device capability consumed by the FAT engine.
// Backends: an in-memory byte region and an image file on the host.

use crate::{FatError, FatResult};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// A device that reads and writes whole sectors.
///
/// Every call transfers exactly `sector_size()` bytes per sector; callers
/// pass buffers that are a whole number of sectors long.
pub trait BlockDevice {
    fn sector_size(&self) -> usize;

    fn sector_count(&self) -> u64;

    fn read_sector(&mut self, lba: u32, buffer: &mut [u8]) -> FatResult<()>;

    fn write_sector(&mut self, lba: u32, buffer: &[u8]) -> FatResult<()>;

    /// Read `buffer.len() / sector_size()` consecutive sectors starting at `lba`.
    fn read_sectors(&mut self, lba: u32, buffer: &mut [u8]) -> FatResult<()> {
        let sector_size = self.sector_size();
        check_multiple(buffer.len(), sector_size)?;
        for (i, chunk) in buffer.chunks_exact_mut(sector_size).enumerate() {
            self.read_sector(lba + i as u32, chunk)?;
        }
        Ok(())
    }

    /// Write `buffer.len() / sector_size()` consecutive sectors starting at `lba`.
    fn write_sectors(&mut self, lba: u32, buffer: &[u8]) -> FatResult<()> {
        let sector_size = self.sector_size();
        check_multiple(buffer.len(), sector_size)?;
        for (i, chunk) in buffer.chunks_exact(sector_size).enumerate() {
            self.write_sector(lba + i as u32, chunk)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> FatResult<()> {
        Ok(())
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn sector_size(&self) -> usize {
        (**self).sector_size()
    }

    fn sector_count(&self) -> u64 {
        (**self).sector_count()
    }

    fn read_sector(&mut self, lba: u32, buffer: &mut [u8]) -> FatResult<()> {
        (**self).read_sector(lba, buffer)
    }

    fn write_sector(&mut self, lba: u32, buffer: &[u8]) -> FatResult<()> {
        (**self).write_sector(lba, buffer)
    }

    fn flush(&mut self) -> FatResult<()> {
        (**self).flush()
    }
}

fn check_multiple(len: usize, sector_size: usize) -> FatResult<()> {
    if len == 0 || len % sector_size != 0 {
        return Err(FatError::InvalidInput(format!(
            "buffer of {} bytes is not a whole number of {}-byte sectors",
            len, sector_size
        )));
    }
    Ok(())
}

fn check_sector_buffer(len: usize, sector_size: usize) -> FatResult<()> {
    if len != sector_size {
        return Err(FatError::InvalidInput(format!(
            "sector buffer is {} bytes, expected {}",
            len, sector_size
        )));
    }
    Ok(())
}

fn out_of_range(lba: u32, sector_count: u64) -> FatError {
    FatError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("sector {} beyond end of device ({} sectors)", lba, sector_count),
    ))
}

/// Device backed by a byte vector, the stand-in for a memory-mapped disk.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    data: Vec<u8>,
    sector_size: usize,
}

impl MemoryDevice {
    /// Zero-filled device of `sector_count` sectors.
    ///
    /// # Panics
    ///
    /// Panics if `sector_size` is 0. Use `from_bytes` to get an error instead.
    pub fn new(sector_size: usize, sector_count: u64) -> Self {
        assert!(sector_size > 0, "sector size cannot be 0");
        Self {
            data: vec![0u8; sector_size * sector_count as usize],
            sector_size,
        }
    }

    /// Wrap an existing image. Trailing bytes past the last whole sector are ignored.
    pub fn from_bytes(data: Vec<u8>, sector_size: usize) -> FatResult<Self> {
        if sector_size == 0 {
            return Err(FatError::InvalidInput("sector size cannot be 0".into()));
        }
        Ok(Self { data, sector_size })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, lba: u32) -> FatResult<std::ops::Range<usize>> {
        if lba as u64 >= self.sector_count() {
            return Err(out_of_range(lba, self.sector_count()));
        }
        let start = lba as usize * self.sector_size;
        Ok(start..start + self.sector_size)
    }
}

impl BlockDevice for MemoryDevice {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        (self.data.len() / self.sector_size) as u64
    }

    fn read_sector(&mut self, lba: u32, buffer: &mut [u8]) -> FatResult<()> {
        check_sector_buffer(buffer.len(), self.sector_size)?;
        let range = self.range(lba)?;
        buffer.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sector(&mut self, lba: u32, buffer: &[u8]) -> FatResult<()> {
        check_sector_buffer(buffer.len(), self.sector_size)?;
        let range = self.range(lba)?;
        self.data[range].copy_from_slice(buffer);
        Ok(())
    }
}

/// Device backed by a disk image on the host filesystem.
pub struct FileDevice {
    file: File,
    sector_size: usize,
    sector_count: u64,
}

impl FileDevice {
    /// Open an existing image for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P, sector_size: usize) -> FatResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        Self::from_file(file, sector_size)
    }

    /// Open an existing image without write access.
    pub fn open_read_only<P: AsRef<Path>>(path: P, sector_size: usize) -> FatResult<Self> {
        let file = OpenOptions::new().read(true).open(path.as_ref())?;
        Self::from_file(file, sector_size)
    }

    /// Create (or truncate) an image of `sector_count` zeroed sectors.
    pub fn create<P: AsRef<Path>>(path: P, sector_size: usize, sector_count: u64) -> FatResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(sector_size as u64 * sector_count)?;
        debug!(
            "Created image {} with {} sectors of {} bytes",
            path.as_ref().display(),
            sector_count,
            sector_size
        );
        Self::from_file(file, sector_size)
    }

    pub fn from_file(file: File, sector_size: usize) -> FatResult<Self> {
        if sector_size == 0 {
            return Err(FatError::InvalidInput("sector size cannot be 0".into()));
        }
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sector_size,
            sector_count: len / sector_size as u64,
        })
    }

    fn seek_to(&mut self, lba: u32) -> FatResult<()> {
        if lba as u64 >= self.sector_count {
            return Err(out_of_range(lba, self.sector_count));
        }
        self.file
            .seek(SeekFrom::Start(lba as u64 * self.sector_size as u64))?;
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sector(&mut self, lba: u32, buffer: &mut [u8]) -> FatResult<()> {
        check_sector_buffer(buffer.len(), self.sector_size)?;
        self.seek_to(lba)?;
        self.file.read_exact(buffer)?;
        Ok(())
    }

    fn write_sector(&mut self, lba: u32, buffer: &[u8]) -> FatResult<()> {
        check_sector_buffer(buffer.len(), self.sector_size)?;
        self.seek_to(lba)?;
        self.file.write_all(buffer)?;
        Ok(())
    }

    fn flush(&mut self) -> FatResult<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_device_round_trips_sectors() {
        let mut dev = MemoryDevice::new(512, 4);
        let data = [0xABu8; 512];
        dev.write_sector(2, &data).unwrap();

        let mut out = [0u8; 512];
        dev.read_sector(2, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(&dev.as_bytes()[1024..1536], &data[..]);
    }

    #[test]
    #[should_panic(expected = "sector size cannot be 0")]
    fn memory_device_requires_sector_size() {
        MemoryDevice::new(0, 16);
    }

    #[test]
    fn zero_sector_size_image_is_invalid_input() {
        assert!(matches!(
            MemoryDevice::from_bytes(vec![0u8; 512], 0),
            Err(FatError::InvalidInput(_))
        ));
    }

    #[test]
    fn memory_device_rejects_out_of_range() {
        let mut dev = MemoryDevice::new(512, 4);
        let mut out = [0u8; 512];
        assert!(matches!(dev.read_sector(4, &mut out), Err(FatError::Io(_))));
    }

    #[test]
    fn wrong_buffer_length_is_invalid_input() {
        let mut dev = MemoryDevice::new(512, 4);
        let mut out = [0u8; 100];
        assert!(matches!(dev.read_sector(0, &mut out), Err(FatError::InvalidInput(_))));
    }

    #[test]
    fn multi_sector_helpers_span_sectors() {
        let mut dev = MemoryDevice::new(512, 8);
        let data: Vec<u8> = (0..1536).map(|i| (i % 251) as u8).collect();
        dev.write_sectors(3, &data).unwrap();

        let mut out = vec![0u8; 1536];
        dev.read_sectors(3, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn file_device_persists_to_disk() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        {
            let mut dev = FileDevice::create(temp.path(), 512, 16).unwrap();
            assert_eq!(dev.sector_count(), 16);
            dev.write_sector(5, &[7u8; 512]).unwrap();
            dev.flush().unwrap();
        }

        let mut dev = FileDevice::open(temp.path(), 512).unwrap();
        let mut out = [0u8; 512];
        dev.read_sector(5, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 7));
    }

    #[test]
    fn borrowed_device_forwards_calls() {
        fn stamp<D: BlockDevice>(mut device: D) {
            device.write_sector(1, &[1u8; 512]).unwrap();
        }

        let mut dev = MemoryDevice::new(512, 2);
        stamp(&mut dev);
        assert_eq!(dev.as_bytes()[512], 1);
    }
}
