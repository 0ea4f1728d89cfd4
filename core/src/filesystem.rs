use serde::{Deserialize, Serialize};

/// Options applied when a volume is mounted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountOptions {
    /// Reject every mutating operation with `FatError::ReadOnly`.
    pub read_only: bool,
    /// Write allocation-table updates to every FAT copy, not only the first.
    pub mirror_fats: bool,
    /// Keep the FAT32 FSInfo free count and next-free hint current.
    pub update_fs_info: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            mirror_fats: true,
            update_fs_info: true,
        }
    }
}

impl MountOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatOptions {
    /// "fat12", "fat16" or "fat32".
    pub filesystem_type: String,
    pub label: Option<String>,
    /// Cluster size in bytes; picked from the volume size when absent.
    pub cluster_size: Option<u32>,
    /// Sectors to format; the whole device when absent.
    pub total_sectors: Option<u64>,
    /// Root directory capacity for FAT12/16.
    pub root_entries: Option<u16>,
    pub num_fats: u8,
    /// Skip zeroing the data region.
    pub quick_format: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            filesystem_type: String::new(),
            label: None,
            cluster_size: None,
            total_sectors: None,
            root_entries: None,
            num_fats: 2,
            quick_format: true,
        }
    }
}

impl FormatOptions {
    pub fn new(filesystem_type: &str) -> Self {
        Self {
            filesystem_type: filesystem_type.to_string(),
            ..Self::default()
        }
    }
}
