/// Test utilities: a device wrapper that fails on demand
use crate::{BlockDevice, FatError, FatResult};
use std::io;

/// Wraps a device and starts failing reads or writes after a budget runs out.
///
/// Used to check that I/O errors propagate and that the engine orders its
/// writes so a failed operation never leaves a half-written directory entry.
#[derive(Debug)]
pub struct FaultyDevice<D> {
    inner: D,
    writes_left: Option<usize>,
    reads_left: Option<usize>,
    pub writes: usize,
    pub reads: usize,
}

impl<D: BlockDevice> FaultyDevice<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            writes_left: None,
            reads_left: None,
            writes: 0,
            reads: 0,
        }
    }

    /// Allow `count` more sector writes, then fail every write.
    pub fn fail_writes_after(&mut self, count: usize) {
        self.writes_left = Some(count);
    }

    /// Allow `count` more sector reads, then fail every read.
    pub fn fail_reads_after(&mut self, count: usize) {
        self.reads_left = Some(count);
    }

    pub fn heal(&mut self) {
        self.writes_left = None;
        self.reads_left = None;
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

fn injected(op: &str, lba: u32) -> FatError {
    FatError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("injected {} failure at sector {}", op, lba),
    ))
}

impl<D: BlockDevice> BlockDevice for FaultyDevice<D> {
    fn sector_size(&self) -> usize {
        self.inner.sector_size()
    }

    fn sector_count(&self) -> u64 {
        self.inner.sector_count()
    }

    fn read_sector(&mut self, lba: u32, buffer: &mut [u8]) -> FatResult<()> {
        if let Some(left) = self.reads_left.as_mut() {
            if *left == 0 {
                return Err(injected("read", lba));
            }
            *left -= 1;
        }
        self.reads += 1;
        self.inner.read_sector(lba, buffer)
    }

    fn write_sector(&mut self, lba: u32, buffer: &[u8]) -> FatResult<()> {
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(injected("write", lba));
            }
            *left -= 1;
        }
        self.writes += 1;
        self.inner.write_sector(lba, buffer)
    }

    fn flush(&mut self) -> FatResult<()> {
        self.inner.flush()
    }
}
