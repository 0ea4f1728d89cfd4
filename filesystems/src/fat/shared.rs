// Thread-safe handle to a mounted volume

use super::{FatFileSystem, VolumeInfo};
use crate::fat_common::DirEntry;
use kfat_core::{BlockDevice, FatError, FatResult};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle that serialises whole operations on one mount.
///
/// The lock is held from lookup through allocation to the final entry
/// write, so two threads never scan for free clusters at the same time.
pub struct SharedFileSystem<D: BlockDevice> {
    inner: Arc<Mutex<FatFileSystem<D>>>,
}

impl<D: BlockDevice> Clone for SharedFileSystem<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: BlockDevice> SharedFileSystem<D> {
    pub fn new(fs: FatFileSystem<D>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fs)),
        }
    }

    fn lock(&self) -> FatResult<MutexGuard<'_, FatFileSystem<D>>> {
        self.inner.lock().map_err(|_| FatError::LockPoisoned)
    }

    /// Run `op` with exclusive access to the volume.
    pub fn with<T>(&self, op: impl FnOnce(&mut FatFileSystem<D>) -> FatResult<T>) -> FatResult<T> {
        let mut fs = self.lock()?;
        op(&mut fs)
    }

    pub fn find_entry(&self, name: &str) -> FatResult<DirEntry> {
        self.lock()?.find_entry(name)
    }

    pub fn list_root(&self) -> FatResult<Vec<DirEntry>> {
        self.lock()?.list_root()
    }

    pub fn read_file(&self, name: &str) -> FatResult<Vec<u8>> {
        self.lock()?.read_file(name)
    }

    pub fn create_file(&self, name: &str, content: &[u8]) -> FatResult<DirEntry> {
        self.lock()?.create_file(name, content)
    }

    pub fn write_file(&self, name: &str, content: &[u8]) -> FatResult<DirEntry> {
        self.lock()?.write_file(name, content)
    }

    pub fn append_file(&self, name: &str, content: &[u8]) -> FatResult<DirEntry> {
        self.lock()?.append_file(name, content)
    }

    pub fn truncate_file(&self, name: &str, len: u32) -> FatResult<DirEntry> {
        self.lock()?.truncate_file(name, len)
    }

    pub fn delete_file(&self, name: &str) -> FatResult<()> {
        self.lock()?.delete_file(name)
    }

    pub fn info(&self) -> FatResult<VolumeInfo> {
        Ok(self.lock()?.info())
    }

    /// Unmount once this is the last handle. Otherwise the handle is returned.
    pub fn try_unmount(self) -> Result<FatResult<D>, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(match mutex.into_inner() {
                Ok(fs) => fs.unmount(),
                Err(_) => Err(FatError::LockPoisoned),
            }),
            Err(inner) => Err(Self { inner }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::format_volume;
    use kfat_core::{FormatOptions, MemoryDevice};

    fn shared() -> SharedFileSystem<MemoryDevice> {
        let mut dev = MemoryDevice::new(512, 2880);
        format_volume(&mut dev, &FormatOptions::new("fat12")).unwrap();
        SharedFileSystem::new(FatFileSystem::mount(dev).unwrap())
    }

    #[test]
    fn clones_see_the_same_volume() {
        let a = shared();
        let b = a.clone();
        a.create_file("A.TXT", b"hello").unwrap();
        assert_eq!(b.read_file("A.TXT").unwrap(), b"hello");
        assert!(matches!(a.try_unmount(), Err(_)));
    }

    #[test]
    fn truncate_through_shared_handle() {
        let fs = shared();
        fs.create_file("LOG.TXT", &[b'x'; 2000]).unwrap();
        let free = fs.info().unwrap().free_clusters;

        let entry = fs.truncate_file("LOG.TXT", 100).unwrap();
        assert_eq!(entry.file_size, 100);
        assert_eq!(fs.read_file("LOG.TXT").unwrap(), vec![b'x'; 100]);
        assert_eq!(fs.info().unwrap().free_clusters, free + 3);
    }

    #[test]
    fn poisoned_lock_is_reported() {
        let fs = shared();
        let other = fs.clone();
        let _ = std::thread::spawn(move || {
            other
                .with(|_| -> FatResult<()> { panic!("operation panicked") })
                .ok();
        })
        .join();
        assert!(matches!(fs.list_root(), Err(FatError::LockPoisoned)));
    }

    #[test]
    fn last_handle_unmounts() {
        let fs = shared();
        fs.create_file("KEEP.TXT", b"kept").unwrap();
        let dev = match fs.try_unmount() {
            Ok(result) => result.unwrap(),
            Err(_) => panic!("handle still shared"),
        };
        let mut fs = FatFileSystem::mount(dev).unwrap();
        assert_eq!(fs.read_file("KEEP.TXT").unwrap(), b"kept");
    }
}
