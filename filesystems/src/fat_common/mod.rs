// Common FAT building blocks shared by FAT12, FAT16 and FAT32:
// wire formats, the allocation table and cluster chains.

pub mod constants;
pub mod boot_sector;
pub mod directory;
pub mod timestamps;
pub mod fat_table;
pub mod cluster_chain;

pub use constants::*;
pub use boot_sector::*;
pub use directory::*;
pub use timestamps::*;
pub use fat_table::*;

use kfat_core::FatError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// FAT flavour of a volume.
///
/// Decided purely by the cluster count once the geometry is known. `ExFat`
/// is only ever reported by [`probe_variant`] and is never mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
    ExFat,
}

impl FatVariant {
    pub fn from_cluster_count(total_clusters: u32) -> Self {
        if total_clusters <= FAT12_MAX_CLUSTERS {
            FatVariant::Fat12
        } else if total_clusters <= FAT16_MAX_CLUSTERS {
            FatVariant::Fat16
        } else {
            FatVariant::Fat32
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FatVariant::Fat12 => "FAT12",
            FatVariant::Fat16 => "FAT16",
            FatVariant::Fat32 => "FAT32",
            FatVariant::ExFat => "exFAT",
        }
    }

    /// Width of one allocation-table entry in bits.
    pub fn entry_bits(&self) -> u32 {
        match self {
            FatVariant::Fat12 => 12,
            FatVariant::Fat16 => 16,
            FatVariant::Fat32 | FatVariant::ExFat => 32,
        }
    }

    /// Byte offset of a cluster's entry inside the table.
    pub fn entry_offset(&self, cluster: u32) -> usize {
        match self {
            FatVariant::Fat12 => (cluster + cluster / 2) as usize,
            FatVariant::Fat16 => cluster as usize * 2,
            FatVariant::Fat32 | FatVariant::ExFat => cluster as usize * 4,
        }
    }

    /// Bytes needed to hold `entries` table entries.
    pub fn table_bytes(&self, entries: u64) -> u64 {
        (entries * self.entry_bits() as u64 + 7) / 8
    }

    pub fn bad_marker(&self) -> u32 {
        match self {
            FatVariant::Fat12 => FAT12_BAD,
            FatVariant::Fat16 => FAT16_BAD,
            FatVariant::Fat32 | FatVariant::ExFat => FAT32_BAD,
        }
    }

    /// Lowest value of the end-of-chain range.
    pub fn end_of_chain_min(&self) -> u32 {
        match self {
            FatVariant::Fat12 => FAT12_EOC_MIN,
            FatVariant::Fat16 => FAT16_EOC_MIN,
            FatVariant::Fat32 | FatVariant::ExFat => FAT32_EOC_MIN,
        }
    }

    /// End-of-chain value written when a cluster is allocated.
    pub fn end_of_chain(&self) -> u32 {
        match self {
            FatVariant::Fat12 => FAT12_EOC,
            FatVariant::Fat16 => FAT16_EOC,
            FatVariant::Fat32 | FatVariant::ExFat => FAT32_EOC,
        }
    }

    /// Largest cluster count the variant can address.
    pub fn max_clusters(&self) -> u32 {
        match self {
            FatVariant::Fat12 => FAT12_MAX_CLUSTERS,
            FatVariant::Fat16 => FAT16_MAX_CLUSTERS,
            FatVariant::Fat32 | FatVariant::ExFat => FAT32_MAX_CLUSTERS,
        }
    }

    /// Smallest cluster count that still detects as this variant.
    pub fn min_clusters(&self) -> u32 {
        match self {
            FatVariant::Fat12 => 1,
            FatVariant::Fat16 => FAT16_MIN_CLUSTERS,
            FatVariant::Fat32 | FatVariant::ExFat => FAT32_MIN_CLUSTERS,
        }
    }
}

impl fmt::Display for FatVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FatVariant {
    type Err = FatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fat12" => Ok(FatVariant::Fat12),
            "fat16" => Ok(FatVariant::Fat16),
            "fat32" => Ok(FatVariant::Fat32),
            "exfat" => Err(FatError::UnsupportedVariant("exFAT".to_string())),
            other => Err(FatError::UnsupportedVariant(other.to_string())),
        }
    }
}

/// Convert a string to the 11-byte, space-padded volume label format
pub fn format_volume_label(label: Option<&str>) -> [u8; 11] {
    let mut result = [0x20u8; 11];

    if let Some(label) = label {
        let label = label.to_uppercase();
        let bytes = label.as_bytes();
        let len = bytes.len().min(11);
        result[..len].copy_from_slice(&bytes[..len]);
    }

    result
}

/// Volume serial number derived from the current time
pub fn generate_volume_serial() -> u32 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => (duration.as_secs() as u32).wrapping_add(duration.subsec_nanos()),
        Err(_) => 0x12345678,
    }
}
