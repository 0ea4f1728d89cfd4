// Boot sector (BPB) parsing and the volume geometry derived from it

use super::constants::*;
use super::FatVariant;
use byteorder::{ByteOrder, LittleEndian};
use kfat_core::{FatError, FatResult};
use log::debug;
use serde::Serialize;

/// Raw BIOS Parameter Block fields.
///
/// The FAT32 extension is present when `sectors_per_fat_16` is zero; the
/// FAT12/16 layout carries the drive number, serial and label at 0x24.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    pub jump_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_entries: u16,
    pub total_sectors_16: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat_16: u16,
    pub sectors_per_track: u16,
    pub num_heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,

    // FAT32 extension
    pub sectors_per_fat_32: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,

    // Extended boot record, both layouts
    pub drive_number: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

impl BootSector {
    pub fn parse(buf: &[u8]) -> FatResult<Self> {
        if buf.len() < 512 {
            return Err(FatError::InvalidBootSector(format!(
                "boot sector is {} bytes, need at least 512",
                buf.len()
            )));
        }
        if &buf[BS_OEM_NAME..BS_OEM_NAME + 8] == EXFAT_OEM_NAME {
            return Err(FatError::UnsupportedVariant("exFAT".to_string()));
        }
        if buf[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2] != BOOT_SIGNATURE {
            return Err(FatError::InvalidBootSector(format!(
                "missing 0x55AA signature (found {:02X}{:02X})",
                buf[BOOT_SIGNATURE_OFFSET],
                buf[BOOT_SIGNATURE_OFFSET + 1]
            )));
        }

        let mut jump_boot = [0u8; 3];
        jump_boot.copy_from_slice(&buf[BS_JMP_BOOT..BS_JMP_BOOT + 3]);
        let mut oem_name = [0u8; 8];
        oem_name.copy_from_slice(&buf[BS_OEM_NAME..BS_OEM_NAME + 8]);

        let sectors_per_fat_16 = LittleEndian::read_u16(&buf[BPB_FAT_SZ16..]);
        let fat32_layout = sectors_per_fat_16 == 0;

        let mut bs = BootSector {
            jump_boot,
            oem_name,
            bytes_per_sector: LittleEndian::read_u16(&buf[BPB_BYTES_PER_SEC..]),
            sectors_per_cluster: buf[BPB_SEC_PER_CLUS],
            reserved_sectors: LittleEndian::read_u16(&buf[BPB_RSVD_SEC_CNT..]),
            num_fats: buf[BPB_NUM_FATS],
            root_entries: LittleEndian::read_u16(&buf[BPB_ROOT_ENT_CNT..]),
            total_sectors_16: LittleEndian::read_u16(&buf[BPB_TOT_SEC16..]),
            media_descriptor: buf[BPB_MEDIA],
            sectors_per_fat_16,
            sectors_per_track: LittleEndian::read_u16(&buf[BPB_SEC_PER_TRK..]),
            num_heads: LittleEndian::read_u16(&buf[BPB_NUM_HEADS..]),
            hidden_sectors: LittleEndian::read_u32(&buf[BPB_HIDD_SEC..]),
            total_sectors_32: LittleEndian::read_u32(&buf[BPB_TOT_SEC32..]),
            sectors_per_fat_32: 0,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 0,
            fs_info_sector: 0,
            backup_boot_sector: 0,
            drive_number: 0,
            boot_signature: 0,
            volume_id: 0,
            volume_label: [0x20; 11],
            fs_type: [0x20; 8],
        };

        let (drv, sig, vol_id, vol_lab, fs_type) = if fat32_layout {
            bs.sectors_per_fat_32 = LittleEndian::read_u32(&buf[BPB_FAT_SZ32..]);
            bs.ext_flags = LittleEndian::read_u16(&buf[BPB_EXT_FLAGS..]);
            bs.fs_version = LittleEndian::read_u16(&buf[BPB_FS_VER..]);
            bs.root_cluster = LittleEndian::read_u32(&buf[BPB_ROOT_CLUS..]);
            bs.fs_info_sector = LittleEndian::read_u16(&buf[BPB_FS_INFO..]);
            bs.backup_boot_sector = LittleEndian::read_u16(&buf[BPB_BK_BOOT_SEC..]);
            (BS32_DRV_NUM, BS32_BOOT_SIG, BS32_VOL_ID, BS32_VOL_LAB, BS32_FIL_SYS_TYPE)
        } else {
            (BS16_DRV_NUM, BS16_BOOT_SIG, BS16_VOL_ID, BS16_VOL_LAB, BS16_FIL_SYS_TYPE)
        };

        bs.drive_number = buf[drv];
        bs.boot_signature = buf[sig];
        if bs.boot_signature == EXTENDED_BOOT_SIGNATURE {
            bs.volume_id = LittleEndian::read_u32(&buf[vol_id..]);
            bs.volume_label.copy_from_slice(&buf[vol_lab..vol_lab + 11]);
            bs.fs_type.copy_from_slice(&buf[fs_type..fs_type + 8]);
        }

        Ok(bs)
    }

    /// Encode into the first 512 bytes of `buf`, including the 0x55AA signature.
    pub fn serialize(&self, buf: &mut [u8]) -> FatResult<()> {
        if buf.len() < 512 {
            return Err(FatError::InvalidInput(format!(
                "boot sector buffer is {} bytes, need at least 512",
                buf.len()
            )));
        }

        buf[BS_JMP_BOOT..BS_JMP_BOOT + 3].copy_from_slice(&self.jump_boot);
        buf[BS_OEM_NAME..BS_OEM_NAME + 8].copy_from_slice(&self.oem_name);
        LittleEndian::write_u16(&mut buf[BPB_BYTES_PER_SEC..], self.bytes_per_sector);
        buf[BPB_SEC_PER_CLUS] = self.sectors_per_cluster;
        LittleEndian::write_u16(&mut buf[BPB_RSVD_SEC_CNT..], self.reserved_sectors);
        buf[BPB_NUM_FATS] = self.num_fats;
        LittleEndian::write_u16(&mut buf[BPB_ROOT_ENT_CNT..], self.root_entries);
        LittleEndian::write_u16(&mut buf[BPB_TOT_SEC16..], self.total_sectors_16);
        buf[BPB_MEDIA] = self.media_descriptor;
        LittleEndian::write_u16(&mut buf[BPB_FAT_SZ16..], self.sectors_per_fat_16);
        LittleEndian::write_u16(&mut buf[BPB_SEC_PER_TRK..], self.sectors_per_track);
        LittleEndian::write_u16(&mut buf[BPB_NUM_HEADS..], self.num_heads);
        LittleEndian::write_u32(&mut buf[BPB_HIDD_SEC..], self.hidden_sectors);
        LittleEndian::write_u32(&mut buf[BPB_TOT_SEC32..], self.total_sectors_32);

        let (drv, sig, vol_id, vol_lab, fs_type) = if self.is_fat32_layout() {
            LittleEndian::write_u32(&mut buf[BPB_FAT_SZ32..], self.sectors_per_fat_32);
            LittleEndian::write_u16(&mut buf[BPB_EXT_FLAGS..], self.ext_flags);
            LittleEndian::write_u16(&mut buf[BPB_FS_VER..], self.fs_version);
            LittleEndian::write_u32(&mut buf[BPB_ROOT_CLUS..], self.root_cluster);
            LittleEndian::write_u16(&mut buf[BPB_FS_INFO..], self.fs_info_sector);
            LittleEndian::write_u16(&mut buf[BPB_BK_BOOT_SEC..], self.backup_boot_sector);
            (BS32_DRV_NUM, BS32_BOOT_SIG, BS32_VOL_ID, BS32_VOL_LAB, BS32_FIL_SYS_TYPE)
        } else {
            (BS16_DRV_NUM, BS16_BOOT_SIG, BS16_VOL_ID, BS16_VOL_LAB, BS16_FIL_SYS_TYPE)
        };

        buf[drv] = self.drive_number;
        buf[sig] = self.boot_signature;
        LittleEndian::write_u32(&mut buf[vol_id..], self.volume_id);
        buf[vol_lab..vol_lab + 11].copy_from_slice(&self.volume_label);
        buf[fs_type..fs_type + 8].copy_from_slice(&self.fs_type);

        buf[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2].copy_from_slice(&BOOT_SIGNATURE);
        Ok(())
    }

    pub fn is_fat32_layout(&self) -> bool {
        self.sectors_per_fat_16 == 0
    }

    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    pub fn sectors_per_fat(&self) -> u32 {
        if self.sectors_per_fat_16 != 0 {
            self.sectors_per_fat_16 as u32
        } else {
            self.sectors_per_fat_32
        }
    }

    /// Volume label from the extended boot record, if one was recorded.
    pub fn volume_label(&self) -> Option<String> {
        if self.boot_signature != EXTENDED_BOOT_SIGNATURE {
            return None;
        }
        let label = String::from_utf8_lossy(&self.volume_label).trim().to_string();
        if label.is_empty() || label == "NO NAME" {
            None
        } else {
            Some(label)
        }
    }
}

/// Volume layout: raw BPB values plus everything derived from them.
///
/// Built once at mount; all derived fields are pure functions of the raw ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub num_fats: u32,
    pub root_entries: u32,
    pub sectors_per_fat: u32,
    pub total_sectors: u32,
    pub root_cluster: u32,

    pub root_dir_sectors: u32,
    pub first_fat_sector: u32,
    pub first_root_dir_sector: u32,
    pub first_data_sector: u32,
    pub data_sectors: u32,
    pub total_clusters: u32,
    pub variant: FatVariant,
}

impl VolumeGeometry {
    pub fn from_boot_sector(bs: &BootSector) -> FatResult<Self> {
        let bytes_per_sector = bs.bytes_per_sector as u32;
        let sectors_per_cluster = bs.sectors_per_cluster as u32;

        if bytes_per_sector == 0 {
            return Err(FatError::InvalidBootSector("bytes per sector is 0".into()));
        }
        if sectors_per_cluster == 0 {
            return Err(FatError::InvalidBootSector("sectors per cluster is 0".into()));
        }
        if bs.num_fats == 0 {
            return Err(FatError::InvalidBootSector("number of FATs is 0".into()));
        }
        let sectors_per_fat = bs.sectors_per_fat();
        if sectors_per_fat == 0 {
            return Err(FatError::InvalidBootSector("sectors per FAT is 0".into()));
        }

        let reserved_sectors = bs.reserved_sectors as u32;
        let num_fats = bs.num_fats as u32;
        let root_entries = bs.root_entries as u32;
        let total_sectors = bs.total_sectors();

        let root_dir_sectors =
            (root_entries * DIR_ENTRY_SIZE as u32 + (bytes_per_sector - 1)) / bytes_per_sector;
        let first_fat_sector = reserved_sectors;
        let first_root_dir_sector = first_fat_sector as u64 + num_fats as u64 * sectors_per_fat as u64;
        let first_data_sector = first_root_dir_sector + root_dir_sectors as u64;

        if first_data_sector > total_sectors as u64 {
            return Err(FatError::InvalidBootSector(format!(
                "data region starts at sector {} but the volume has only {} sectors",
                first_data_sector, total_sectors
            )));
        }
        let first_root_dir_sector = first_root_dir_sector as u32;
        let first_data_sector = first_data_sector as u32;

        let data_sectors = total_sectors - first_data_sector;
        let total_clusters = data_sectors / sectors_per_cluster;
        let variant = FatVariant::from_cluster_count(total_clusters);

        let geometry = VolumeGeometry {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            root_entries,
            sectors_per_fat,
            total_sectors,
            root_cluster: if variant == FatVariant::Fat32 { bs.root_cluster } else { 0 },
            root_dir_sectors,
            first_fat_sector,
            first_root_dir_sector,
            first_data_sector,
            data_sectors,
            total_clusters,
            variant,
        };
        geometry.validate_layout()?;

        debug!(
            "Geometry: {} clusters of {} bytes, FAT at {}, data at {}, detected {}",
            total_clusters,
            geometry.bytes_per_cluster(),
            first_fat_sector,
            first_data_sector,
            variant
        );
        Ok(geometry)
    }

    fn validate_layout(&self) -> FatResult<()> {
        if self.total_clusters == 0 {
            return Err(FatError::InvalidBootSector("volume has no data clusters".into()));
        }
        match self.variant {
            FatVariant::Fat12 | FatVariant::Fat16 => {
                if self.root_entries == 0 {
                    return Err(FatError::InvalidBootSector(format!(
                        "{} volume without a root directory region",
                        self.variant
                    )));
                }
            }
            FatVariant::Fat32 => {
                if !self.is_data_cluster(self.root_cluster) {
                    return Err(FatError::InvalidBootSector(format!(
                        "root cluster {} outside the data region",
                        self.root_cluster
                    )));
                }
            }
            FatVariant::ExFat => {
                return Err(FatError::UnsupportedVariant("exFAT".to_string()));
            }
        }

        let needed = self.variant.table_bytes(self.total_clusters as u64 + 2);
        let available = self.sectors_per_fat as u64 * self.bytes_per_sector as u64;
        if needed > available {
            return Err(FatError::InvalidBootSector(format!(
                "FAT of {} bytes cannot describe {} clusters (needs {})",
                available, self.total_clusters, needed
            )));
        }
        Ok(())
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Highest valid cluster number.
    pub fn max_cluster(&self) -> u32 {
        self.total_clusters + 1
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= FIRST_DATA_CLUSTER && cluster <= self.max_cluster()
    }

    /// First sector of a data cluster.
    pub fn cluster_to_lba(&self, cluster: u32) -> u32 {
        self.first_data_sector + (cluster - FIRST_DATA_CLUSTER) * self.sectors_per_cluster
    }

    pub fn fat_size_bytes(&self) -> usize {
        self.sectors_per_fat as usize * self.bytes_per_sector as usize
    }

    /// Root directory slots on FAT12/16; `None` when the root is a cluster chain.
    pub fn fixed_root_capacity(&self) -> Option<u32> {
        match self.variant {
            FatVariant::Fat32 => None,
            _ => Some(self.root_dir_sectors * self.bytes_per_sector / DIR_ENTRY_SIZE as u32),
        }
    }
}

/// Identify the variant of a volume from its first sector without mounting it.
pub fn probe_variant(sector0: &[u8]) -> FatResult<FatVariant> {
    if sector0.len() >= BS_OEM_NAME + 8 && &sector0[BS_OEM_NAME..BS_OEM_NAME + 8] == EXFAT_OEM_NAME {
        return Ok(FatVariant::ExFat);
    }
    let bs = BootSector::parse(sector0)?;
    Ok(VolumeGeometry::from_boot_sector(&bs)?.variant)
}

/// FAT32 FSInfo sector contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: u32,
    pub next_free: u32,
}

impl FsInfo {
    /// `None` unless all three signatures are present.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 512 {
            return None;
        }
        let lead = LittleEndian::read_u32(&buf[FSINFO_LEAD_SIG_OFFSET..]);
        let structure = LittleEndian::read_u32(&buf[FSINFO_STRUCT_SIG_OFFSET..]);
        let trail = LittleEndian::read_u32(&buf[FSINFO_TRAIL_SIG_OFFSET..]);
        if lead != FSINFO_LEAD_SIG || structure != FSINFO_STRUCT_SIG || trail != FSINFO_TRAIL_SIG {
            return None;
        }
        Some(FsInfo {
            free_count: LittleEndian::read_u32(&buf[FSINFO_FREE_COUNT_OFFSET..]),
            next_free: LittleEndian::read_u32(&buf[FSINFO_NEXT_FREE_OFFSET..]),
        })
    }

    /// Write signatures and counters into a sector buffer, leaving the reserved areas alone.
    pub fn write_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[FSINFO_LEAD_SIG_OFFSET..], FSINFO_LEAD_SIG);
        LittleEndian::write_u32(&mut buf[FSINFO_STRUCT_SIG_OFFSET..], FSINFO_STRUCT_SIG);
        LittleEndian::write_u32(&mut buf[FSINFO_FREE_COUNT_OFFSET..], self.free_count);
        LittleEndian::write_u32(&mut buf[FSINFO_NEXT_FREE_OFFSET..], self.next_free);
        LittleEndian::write_u32(&mut buf[FSINFO_TRAIL_SIG_OFFSET..], FSINFO_TRAIL_SIG);
    }
}
