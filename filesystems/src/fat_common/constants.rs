// FAT on-disk constants shared by FAT12, FAT16 and FAT32

// Boot sector offsets
pub const BS_JMP_BOOT: usize = 0x00;
pub const BS_OEM_NAME: usize = 0x03;
pub const BPB_BYTES_PER_SEC: usize = 0x0B;
pub const BPB_SEC_PER_CLUS: usize = 0x0D;
pub const BPB_RSVD_SEC_CNT: usize = 0x0E;
pub const BPB_NUM_FATS: usize = 0x10;
pub const BPB_ROOT_ENT_CNT: usize = 0x11;
pub const BPB_TOT_SEC16: usize = 0x13;
pub const BPB_MEDIA: usize = 0x15;
pub const BPB_FAT_SZ16: usize = 0x16;
pub const BPB_SEC_PER_TRK: usize = 0x18;
pub const BPB_NUM_HEADS: usize = 0x1A;
pub const BPB_HIDD_SEC: usize = 0x1C;
pub const BPB_TOT_SEC32: usize = 0x20;

// FAT12/16 extended BPB (starts at 36)
pub const BS16_DRV_NUM: usize = 0x24;
pub const BS16_BOOT_SIG: usize = 0x26;
pub const BS16_VOL_ID: usize = 0x27;
pub const BS16_VOL_LAB: usize = 0x2B;
pub const BS16_FIL_SYS_TYPE: usize = 0x36;

// FAT32 extended BPB (starts at 36)
pub const BPB_FAT_SZ32: usize = 0x24;
pub const BPB_EXT_FLAGS: usize = 0x28;
pub const BPB_FS_VER: usize = 0x2A;
pub const BPB_ROOT_CLUS: usize = 0x2C;
pub const BPB_FS_INFO: usize = 0x30;
pub const BPB_BK_BOOT_SEC: usize = 0x32;
pub const BS32_DRV_NUM: usize = 0x40;
pub const BS32_BOOT_SIG: usize = 0x42;
pub const BS32_VOL_ID: usize = 0x43;
pub const BS32_VOL_LAB: usize = 0x47;
pub const BS32_FIL_SYS_TYPE: usize = 0x52;

pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const BOOT_SIGNATURE_OFFSET: usize = 0x1FE;
pub const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;
pub const EXFAT_OEM_NAME: &[u8; 8] = b"EXFAT   ";

// FSInfo sector layout
pub const FSINFO_LEAD_SIG: u32 = 0x41615252;
pub const FSINFO_STRUCT_SIG: u32 = 0x61417272;
pub const FSINFO_TRAIL_SIG: u32 = 0xAA550000;
pub const FSINFO_LEAD_SIG_OFFSET: usize = 0;
pub const FSINFO_STRUCT_SIG_OFFSET: usize = 484;
pub const FSINFO_FREE_COUNT_OFFSET: usize = 488;
pub const FSINFO_NEXT_FREE_OFFSET: usize = 492;
pub const FSINFO_TRAIL_SIG_OFFSET: usize = 508;
pub const FSINFO_UNKNOWN: u32 = 0xFFFFFFFF;

// FAT entry values
pub const FAT_FREE: u32 = 0x0000_0000;
pub const FAT_RESERVED: u32 = 0x0000_0001;

pub const FAT12_BAD: u32 = 0x0FF7;
pub const FAT12_EOC_MIN: u32 = 0x0FF8;
pub const FAT12_EOC: u32 = 0x0FFF;

pub const FAT16_BAD: u32 = 0xFFF7;
pub const FAT16_EOC_MIN: u32 = 0xFFF8;
pub const FAT16_EOC: u32 = 0xFFFF;

pub const FAT32_BAD: u32 = 0x0FFF_FFF7;
pub const FAT32_EOC_MIN: u32 = 0x0FFF_FFF8;
pub const FAT32_EOC: u32 = 0x0FFF_FFFF;
/// Only the low 28 bits of a FAT32 entry carry the cluster number.
pub const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;

// Cluster count thresholds
pub const FAT12_MAX_CLUSTERS: u32 = 4084;
pub const FAT16_MIN_CLUSTERS: u32 = 4085;
pub const FAT16_MAX_CLUSTERS: u32 = 65524;
pub const FAT32_MIN_CLUSTERS: u32 = 65525;
pub const FAT32_MAX_CLUSTERS: u32 = 0x0FFF_FFF5;

/// First cluster number of the data region.
pub const FIRST_DATA_CLUSTER: u32 = 2;

// Directory entries
pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_ENTRY_END: u8 = 0x00;
pub const DIR_ENTRY_ERASED: u8 = 0xE5;
/// Stored in place of a leading 0xE5 that belongs to the name itself.
pub const DIR_ENTRY_KANJI_E5: u8 = 0x05;

// Defaults used by the formatter
pub const FAT12_DEFAULT_ROOT_ENTRIES: u16 = 224;
pub const FAT16_DEFAULT_ROOT_ENTRIES: u16 = 512;
pub const FAT1216_RESERVED_SECTORS: u16 = 1;
pub const FAT32_RESERVED_SECTORS: u16 = 32;
pub const FAT32_ROOT_CLUSTER: u32 = 2;
pub const FAT32_FS_INFO_SECTOR: u16 = 1;
pub const FAT32_BACKUP_BOOT_SECTOR: u16 = 6;

// Media descriptors
pub const MEDIA_FIXED: u8 = 0xF8;
pub const MEDIA_REMOVABLE: u8 = 0xF0;
