// Mounted FAT12/16/32 volume
//
// FatFileSystem owns the device, the geometry and the only allocation-table
// cache for the volume. Directory and file operations live in the
// submodules as further impl blocks.

pub mod file_ops;
pub mod formatter;
pub mod root_directory;
pub mod shared;

pub use formatter::format_volume;
pub use shared::SharedFileSystem;

use crate::fat_common::{BootSector, FatTable, FatVariant, FsInfo, VolumeGeometry, FSINFO_UNKNOWN};
use kfat_core::{BlockDevice, FatError, FatResult, MountOptions};
use log::{debug, info, warn};
use serde::Serialize;

/// Summary of a mounted volume, for display.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeInfo {
    pub variant: FatVariant,
    pub label: Option<String>,
    pub serial: u32,
    pub total_clusters: u32,
    pub free_clusters: u32,
    pub bytes_per_cluster: u32,
    pub geometry: VolumeGeometry,
}

pub struct FatFileSystem<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) boot_sector: BootSector,
    pub(crate) geometry: VolumeGeometry,
    pub(crate) fat: FatTable,
    fs_info: Option<FsInfo>,
    pub(crate) options: MountOptions,
}

impl<D: BlockDevice> FatFileSystem<D> {
    pub fn mount(device: D) -> FatResult<Self> {
        Self::mount_with_options(device, MountOptions::default())
    }

    pub fn mount_with_options(mut device: D, options: MountOptions) -> FatResult<Self> {
        let sector_size = device.sector_size();
        let mut sector = vec![0u8; sector_size];
        device.read_sector(0, &mut sector)?;

        let boot_sector = BootSector::parse(&sector)?;
        let geometry = VolumeGeometry::from_boot_sector(&boot_sector)?;

        if geometry.bytes_per_sector as usize != sector_size {
            return Err(FatError::InvalidBootSector(format!(
                "boot sector declares {}-byte sectors but the device uses {}",
                geometry.bytes_per_sector, sector_size
            )));
        }
        if geometry.total_sectors as u64 > device.sector_count() {
            return Err(FatError::InvalidBootSector(format!(
                "volume claims {} sectors but the device has {}",
                geometry.total_sectors,
                device.sector_count()
            )));
        }

        let fat = FatTable::load(&mut device, &geometry)?;
        let fs_info = Self::read_fs_info(&mut device, &boot_sector, &geometry)?;

        info!(
            "Mounted {} volume: {} clusters of {} bytes, {} free{}",
            geometry.variant,
            geometry.total_clusters,
            geometry.bytes_per_cluster(),
            fat.free_cluster_count(),
            if options.read_only { " (read-only)" } else { "" }
        );

        Ok(FatFileSystem {
            device,
            boot_sector,
            geometry,
            fat,
            fs_info,
            options,
        })
    }

    fn read_fs_info(device: &mut D, bs: &BootSector, geometry: &VolumeGeometry) -> FatResult<Option<FsInfo>> {
        if geometry.variant != FatVariant::Fat32 {
            return Ok(None);
        }
        let sector = bs.fs_info_sector as u32;
        if sector == 0 || sector >= geometry.reserved_sectors {
            warn!("FAT32 volume has no usable FSInfo sector ({})", sector);
            return Ok(None);
        }

        let mut buf = vec![0u8; geometry.bytes_per_sector as usize];
        device.read_sector(sector, &mut buf)?;
        match FsInfo::parse(&buf) {
            Some(fs_info) => {
                if fs_info.free_count != FSINFO_UNKNOWN {
                    debug!("FSInfo reports {} free clusters", fs_info.free_count);
                }
                Ok(Some(fs_info))
            }
            None => {
                warn!("FSInfo sector {} has invalid signatures, ignoring it", sector);
                Ok(None)
            }
        }
    }

    /// Write back the allocation table and, on FAT32, the FSInfo counters.
    pub fn flush_fat(&mut self) -> FatResult<()> {
        self.fat.flush(&mut self.device, self.options.mirror_fats)?;

        if !self.options.update_fs_info {
            return Ok(());
        }
        let Some(current) = self.fs_info else {
            return Ok(());
        };
        let updated = FsInfo {
            free_count: self.fat.free_cluster_count(),
            next_free: self.fat.next_free_hint,
        };
        if updated != current {
            let lba = self.boot_sector.fs_info_sector as u32;
            let mut buf = vec![0u8; self.geometry.bytes_per_sector as usize];
            self.device.read_sector(lba, &mut buf)?;
            updated.write_into(&mut buf);
            self.device.write_sector(lba, &buf)?;
            self.fs_info = Some(updated);
        }
        Ok(())
    }

    /// Flush everything and hand the device back.
    pub fn unmount(mut self) -> FatResult<D> {
        if !self.options.read_only {
            self.flush_fat()?;
        }
        self.device.flush()?;
        debug!("Unmounted {} volume", self.geometry.variant);
        Ok(self.device)
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            variant: self.geometry.variant,
            label: self.boot_sector.volume_label(),
            serial: self.boot_sector.volume_id,
            total_clusters: self.geometry.total_clusters,
            free_clusters: self.fat.free_cluster_count(),
            bytes_per_cluster: self.geometry.bytes_per_cluster(),
            geometry: self.geometry,
        }
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn variant(&self) -> FatVariant {
        self.geometry.variant
    }

    pub fn free_cluster_count(&self) -> u32 {
        self.fat.free_cluster_count()
    }

    /// The allocation table, for inspection.
    pub fn fat(&self) -> &FatTable {
        &self.fat
    }

    /// FSInfo as last read or written; `None` off FAT32 or when it was invalid.
    pub fn fs_info(&self) -> Option<FsInfo> {
        self.fs_info
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Raw device access. Writes made through it bypass the FAT cache.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub(crate) fn ensure_writable(&self) -> FatResult<()> {
        if self.options.read_only {
            Err(FatError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub(crate) fn read_cluster(&mut self, cluster: u32, buf: &mut [u8]) -> FatResult<()> {
        let lba = self.geometry.cluster_to_lba(cluster);
        self.device.read_sectors(lba, buf)
    }

    pub(crate) fn write_cluster(&mut self, cluster: u32, buf: &[u8]) -> FatResult<()> {
        let lba = self.geometry.cluster_to_lba(cluster);
        self.device.write_sectors(lba, buf)
    }

    /// Flush the FAT, or roll the cache back to the on-disk table if that fails.
    pub(crate) fn commit_fat(&mut self) -> FatResult<()> {
        if let Err(e) = self.flush_fat() {
            self.discard_fat_changes();
            return Err(e);
        }
        Ok(())
    }

    /// Drop unflushed allocation changes by reloading the table from disk.
    pub(crate) fn discard_fat_changes(&mut self) {
        match FatTable::load(&mut self.device, &self.geometry) {
            Ok(fat) => self.fat = fat,
            Err(e) => warn!("Could not reload the FAT after a failed operation: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfat_core::{FormatOptions, MemoryDevice};

    fn floppy() -> MemoryDevice {
        let mut dev = MemoryDevice::new(512, 2880);
        format_volume(&mut dev, &FormatOptions::new("fat12")).unwrap();
        dev
    }

    #[test]
    fn mount_reports_geometry() {
        let fs = FatFileSystem::mount(floppy()).unwrap();
        let info = fs.info();
        assert_eq!(info.variant, FatVariant::Fat12);
        assert_eq!(info.total_clusters, 2847);
        assert_eq!(info.free_clusters, 2847);
        assert_eq!(info.bytes_per_cluster, 512);
        assert!(fs.fs_info().is_none());
    }

    #[test]
    fn mount_rejects_blank_device() {
        assert!(matches!(
            FatFileSystem::mount(MemoryDevice::new(512, 100)),
            Err(FatError::InvalidBootSector(_))
        ));
    }

    #[test]
    fn mount_rejects_truncated_image() {
        let mut bytes = floppy().into_inner();
        bytes.truncate(512 * 1000);
        let dev = MemoryDevice::from_bytes(bytes, 512).unwrap();
        assert!(matches!(FatFileSystem::mount(dev), Err(FatError::InvalidBootSector(_))));
    }

    #[test]
    fn mount_rejects_sector_size_mismatch() {
        let bytes = floppy().into_inner();
        let dev = MemoryDevice::from_bytes(bytes, 1024).unwrap();
        assert!(matches!(FatFileSystem::mount(dev), Err(FatError::InvalidBootSector(_))));
    }

    #[test]
    fn info_serializes() {
        let fs = FatFileSystem::mount(floppy()).unwrap();
        let json = serde_json::to_value(fs.info()).unwrap();
        assert_eq!(json["variant"], "Fat12");
        assert_eq!(json["geometry"]["first_data_sector"], 33);
    }
}
