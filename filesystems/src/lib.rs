// FAT12/16/32 engine on top of a sector block device

pub mod fat;
pub mod fat_common;

pub use fat::{format_volume, FatFileSystem, SharedFileSystem, VolumeInfo};
pub use fat_common::{
    probe_variant, Attributes, BootSector, DirEntry, FatEntry, FatTable, FatTimestamp, FatVariant, FsInfo,
    ShortName, VolumeGeometry,
};
