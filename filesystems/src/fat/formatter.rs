// Lay down a fresh FAT12/16/32 volume on a block device

use crate::fat_common::*;
use kfat_core::{BlockDevice, FatError, FatResult, FormatOptions};
use log::{debug, info};

/// Layout chosen for a volume before anything is written.
#[derive(Debug, Clone, Copy)]
struct Layout {
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    root_entries: u32,
    sectors_per_fat: u32,
    total_clusters: u32,
}

/// Default cluster size for FAT16, in 512-byte sectors.
fn fat16_sectors_per_cluster(total_sectors_512: u64) -> u32 {
    if total_sectors_512 <= 32_680 {
        2 // 1KB clusters for <= 16MB
    } else if total_sectors_512 <= 262_144 {
        4 // 2KB clusters for <= 128MB
    } else if total_sectors_512 <= 524_288 {
        8
    } else if total_sectors_512 <= 1_048_576 {
        16
    } else if total_sectors_512 <= 2_097_152 {
        32
    } else {
        64
    }
}

/// Default cluster size for FAT32, in 512-byte sectors.
fn fat32_sectors_per_cluster(total_sectors_512: u64) -> u32 {
    if total_sectors_512 <= 532_480 {
        1 // 512B clusters for <= 260MB, to reach 65525 clusters
    } else if total_sectors_512 <= 16_777_216 {
        8
    } else if total_sectors_512 <= 33_554_432 {
        16
    } else if total_sectors_512 <= 67_108_864 {
        32
    } else {
        64
    }
}

/// Smallest sectors-per-FAT whose table covers every cluster it leaves room for.
fn solve_layout(
    variant: FatVariant,
    bytes_per_sector: u32,
    total_sectors: u32,
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    num_fats: u32,
    root_entries: u32,
) -> FatResult<Layout> {
    let root_dir_sectors = (root_entries * DIR_ENTRY_SIZE as u32 + bytes_per_sector - 1) / bytes_per_sector;
    let metadata = reserved_sectors as u64 + root_dir_sectors as u64;

    // (clusters, sectors the FAT needs for them) for a given FAT size
    let evaluate = |spf: u32| -> Option<(u32, u32)> {
        let first_data = metadata + num_fats as u64 * spf as u64;
        if first_data >= total_sectors as u64 {
            return None;
        }
        let clusters = ((total_sectors as u64 - first_data) / sectors_per_cluster as u64) as u32;
        let bytes = variant.table_bytes(clusters as u64 + 2);
        let needed = ((bytes + bytes_per_sector as u64 - 1) / bytes_per_sector as u64) as u32;
        Some((clusters, needed))
    };
    let too_small = || {
        FatError::InvalidInput(format!(
            "{} sectors are too few for a {} volume",
            total_sectors, variant
        ))
    };

    let mut spf = 1u32;
    loop {
        let (_, needed) = evaluate(spf).ok_or_else(too_small)?;
        if needed <= spf {
            break;
        }
        spf = needed;
    }
    while spf > 1 {
        match evaluate(spf - 1) {
            Some((_, needed)) if needed <= spf - 1 => spf -= 1,
            _ => break,
        }
    }

    let (total_clusters, _) = evaluate(spf).ok_or_else(too_small)?;
    if total_clusters == 0 {
        return Err(too_small());
    }
    Ok(Layout {
        sectors_per_cluster,
        reserved_sectors,
        root_entries,
        sectors_per_fat: spf,
        total_clusters,
    })
}

fn plan(variant: FatVariant, bytes_per_sector: u32, total_sectors: u32, options: &FormatOptions) -> FatResult<Layout> {
    let num_fats = options.num_fats as u32;
    if num_fats == 0 {
        return Err(FatError::InvalidInput("at least one FAT copy is required".into()));
    }

    let reserved_sectors = match variant {
        FatVariant::Fat32 => FAT32_RESERVED_SECTORS,
        _ => FAT1216_RESERVED_SECTORS,
    } as u32;

    let root_entries = match variant {
        FatVariant::Fat32 => 0,
        _ => {
            let default = if variant == FatVariant::Fat12 {
                FAT12_DEFAULT_ROOT_ENTRIES
            } else {
                FAT16_DEFAULT_ROOT_ENTRIES
            };
            let requested = options.root_entries.unwrap_or(default) as u32;
            if requested == 0 {
                return Err(FatError::InvalidInput(format!("{} needs a root directory", variant)));
            }
            // Round up to whole sectors.
            let per_sector = bytes_per_sector / DIR_ENTRY_SIZE as u32;
            let rounded = (requested + per_sector - 1) / per_sector * per_sector;
            if rounded > u16::MAX as u32 {
                return Err(FatError::InvalidInput(format!("{} root entries is too many", requested)));
            }
            rounded
        }
    };

    let candidates: Vec<u32> = match options.cluster_size {
        Some(bytes) => {
            if bytes == 0 || bytes % bytes_per_sector != 0 {
                return Err(FatError::InvalidInput(format!(
                    "cluster size {} is not a multiple of the {}-byte sector",
                    bytes, bytes_per_sector
                )));
            }
            let spc = bytes / bytes_per_sector;
            if !spc.is_power_of_two() || spc > 128 {
                return Err(FatError::InvalidInput(format!(
                    "cluster size {} needs a power-of-two sector count up to 128",
                    bytes
                )));
            }
            vec![spc]
        }
        None => {
            let scale = (bytes_per_sector / 512).max(1);
            let in_512 = total_sectors as u64 * scale as u64;
            match variant {
                // Smallest cluster that keeps the count under the FAT12 limit.
                FatVariant::Fat12 => (0..8).map(|shift| 1u32 << shift).collect(),
                FatVariant::Fat16 => vec![(fat16_sectors_per_cluster(in_512) / scale).max(1)],
                _ => vec![(fat32_sectors_per_cluster(in_512) / scale).max(1)],
            }
        }
    };

    let mut last_err = None;
    for spc in candidates {
        let layout = solve_layout(
            variant,
            bytes_per_sector,
            total_sectors,
            spc,
            reserved_sectors,
            num_fats,
            root_entries,
        )?;
        if FatVariant::from_cluster_count(layout.total_clusters) == variant {
            return Ok(layout);
        }
        last_err = Some(FatError::InvalidInput(format!(
            "{} clusters of {} bytes do not make a {} volume ({}..={} clusters)",
            layout.total_clusters,
            spc * bytes_per_sector,
            variant,
            variant.min_clusters(),
            variant.max_clusters()
        )));
    }
    Err(last_err.unwrap_or_else(|| FatError::InvalidInput(format!("no usable cluster size for {}", variant))))
}

/// Format `device` and return the geometry a mount will see.
pub fn format_volume<D: BlockDevice>(device: &mut D, options: &FormatOptions) -> FatResult<VolumeGeometry> {
    let variant: FatVariant = options.filesystem_type.parse()?;

    let sector_size = device.sector_size();
    if !(512..=4096).contains(&sector_size) || !sector_size.is_power_of_two() {
        return Err(FatError::InvalidInput(format!(
            "unsupported sector size {}",
            sector_size
        )));
    }
    let bytes_per_sector = sector_size as u32;

    let total_sectors = options.total_sectors.unwrap_or_else(|| device.sector_count());
    if total_sectors > device.sector_count() {
        return Err(FatError::InvalidInput(format!(
            "cannot format {} sectors on a device of {}",
            total_sectors,
            device.sector_count()
        )));
    }
    let total_sectors = u32::try_from(total_sectors)
        .map_err(|_| FatError::InvalidInput(format!("{} sectors exceed the FAT limit", total_sectors)))?;

    let layout = plan(variant, bytes_per_sector, total_sectors, options)?;
    let boot_sector = build_boot_sector(variant, bytes_per_sector, total_sectors, options, &layout);
    let geometry = VolumeGeometry::from_boot_sector(&boot_sector)?;
    debug!("Format layout: {:?}", layout);

    write_reserved_region(device, &boot_sector, &geometry)?;

    let mut fat = FatTable::blank(&geometry);
    let media = boot_sector.media_descriptor as u32;
    fat.write_raw(0, (variant.end_of_chain() & !0xFF) | media);
    fat.write_raw(1, variant.end_of_chain());
    if variant == FatVariant::Fat32 {
        fat.set_entry(geometry.root_cluster, FatEntry::end_of_chain(variant))?;
    }

    if !options.quick_format {
        zero_sectors(device, geometry.first_data_sector, geometry.data_sectors)?;
    }

    fat.flush(device, true)?;
    write_root_directory(device, &geometry, options.label.as_deref())?;
    device.flush()?;

    info!(
        "Formatted {} volume: {} sectors, {} clusters of {} bytes, {} sectors per FAT",
        variant,
        total_sectors,
        geometry.total_clusters,
        geometry.bytes_per_cluster(),
        geometry.sectors_per_fat
    );
    Ok(geometry)
}

fn build_boot_sector(
    variant: FatVariant,
    bytes_per_sector: u32,
    total_sectors: u32,
    options: &FormatOptions,
    layout: &Layout,
) -> BootSector {
    let fat32 = variant == FatVariant::Fat32;
    let small = !fat32 && total_sectors < 0x10000;

    let (fs_type, media, drive_number) = match variant {
        FatVariant::Fat12 => (*b"FAT12   ", MEDIA_REMOVABLE, 0x00),
        FatVariant::Fat16 => (*b"FAT16   ", MEDIA_FIXED, 0x80),
        _ => (*b"FAT32   ", MEDIA_FIXED, 0x80),
    };

    BootSector {
        jump_boot: if fat32 { [0xEB, 0x58, 0x90] } else { [0xEB, 0x3C, 0x90] },
        oem_name: *b"KFAT    ",
        bytes_per_sector: bytes_per_sector as u16,
        sectors_per_cluster: layout.sectors_per_cluster as u8,
        reserved_sectors: layout.reserved_sectors as u16,
        num_fats: options.num_fats,
        root_entries: layout.root_entries as u16,
        total_sectors_16: if small { total_sectors as u16 } else { 0 },
        media_descriptor: media,
        sectors_per_fat_16: if fat32 { 0 } else { layout.sectors_per_fat as u16 },
        sectors_per_track: 63,
        num_heads: 255,
        hidden_sectors: 0,
        total_sectors_32: if small { 0 } else { total_sectors },
        sectors_per_fat_32: if fat32 { layout.sectors_per_fat } else { 0 },
        ext_flags: 0,
        fs_version: 0,
        root_cluster: if fat32 { FAT32_ROOT_CLUSTER } else { 0 },
        fs_info_sector: if fat32 { FAT32_FS_INFO_SECTOR } else { 0 },
        backup_boot_sector: if fat32 { FAT32_BACKUP_BOOT_SECTOR } else { 0 },
        drive_number,
        boot_signature: EXTENDED_BOOT_SIGNATURE,
        volume_id: generate_volume_serial(),
        volume_label: format_volume_label(options.label.as_deref()),
        fs_type,
    }
}

/// Boot sector, plus FSInfo and the backup copies on FAT32. Other reserved sectors are zeroed.
fn write_reserved_region<D: BlockDevice>(
    device: &mut D,
    boot_sector: &BootSector,
    geometry: &VolumeGeometry,
) -> FatResult<()> {
    let bps = geometry.bytes_per_sector as usize;
    let mut boot = vec![0u8; bps];
    boot_sector.serialize(&mut boot)?;

    zero_sectors(device, 0, geometry.reserved_sectors)?;
    device.write_sector(0, &boot)?;

    if geometry.variant == FatVariant::Fat32 {
        let mut fs_info = vec![0u8; bps];
        FsInfo {
            // the root directory already holds one cluster
            free_count: geometry.total_clusters - 1,
            next_free: geometry.root_cluster + 1,
        }
        .write_into(&mut fs_info);

        let info_lba = boot_sector.fs_info_sector as u32;
        let backup_lba = boot_sector.backup_boot_sector as u32;
        device.write_sector(info_lba, &fs_info)?;
        device.write_sector(backup_lba, &boot)?;
        device.write_sector(backup_lba + 1, &fs_info)?;
    }
    Ok(())
}

fn write_root_directory<D: BlockDevice>(device: &mut D, geometry: &VolumeGeometry, label: Option<&str>) -> FatResult<()> {
    let (start, sectors) = match geometry.variant {
        FatVariant::Fat32 => (geometry.cluster_to_lba(geometry.root_cluster), geometry.sectors_per_cluster),
        _ => (geometry.first_root_dir_sector, geometry.root_dir_sectors),
    };
    zero_sectors(device, start, sectors)?;

    if let Some(label) = label.filter(|l| !l.trim().is_empty()) {
        let name = ShortName::from_raw(format_volume_label(Some(label)));
        let entry = DirEntry::new(name, Attributes::volume_label(), 0, 0);
        let mut sector = vec![0u8; geometry.bytes_per_sector as usize];
        entry.write_to(&mut sector[..DIR_ENTRY_SIZE]);
        device.write_sector(start, &sector)?;
    }
    Ok(())
}

fn zero_sectors<D: BlockDevice>(device: &mut D, start: u32, count: u32) -> FatResult<()> {
    let zeroes = vec![0u8; device.sector_size()];
    for lba in start..start + count {
        device.write_sector(lba, &zeroes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfat_core::MemoryDevice;

    #[test]
    fn floppy_layout() {
        let mut dev = MemoryDevice::new(512, 2880);
        let g = format_volume(&mut dev, &FormatOptions::new("fat12")).unwrap();
        assert_eq!(g.variant, FatVariant::Fat12);
        assert_eq!(g.sectors_per_cluster, 1);
        assert_eq!(g.sectors_per_fat, 9);
        assert_eq!(g.root_entries, 224);
        assert_eq!(g.total_clusters, 2847);

        let bytes = dev.as_bytes();
        assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
        // FAT[0] carries the media byte, FAT[1] end of chain
        assert_eq!(&bytes[512..515], &[0xF0, 0xFF, 0xFF]);
        assert_eq!(&bytes[512 * 10..512 * 10 + 3], &[0xF0, 0xFF, 0xFF]);
    }

    #[test]
    fn seventy_thousand_cluster_fat32() {
        let mut dev = MemoryDevice::new(512, 281_126);
        let mut opts = FormatOptions::new("fat32");
        opts.cluster_size = Some(2048);
        let g = format_volume(&mut dev, &opts).unwrap();
        assert_eq!(g.sectors_per_fat, 547);
        assert_eq!(g.total_clusters, 70_000);
        assert_eq!(g.variant, FatVariant::Fat32);

        let bytes = dev.as_bytes();
        let fs_info = FsInfo::parse(&bytes[512..1024]).unwrap();
        assert_eq!(fs_info.free_count, 69_999);
        assert_eq!(&bytes[..512], &bytes[6 * 512..7 * 512]);
    }

    #[test]
    fn default_fat16_layout_is_fat16() {
        let mut dev = MemoryDevice::new(512, 20_000);
        let g = format_volume(&mut dev, &FormatOptions::new("fat16")).unwrap();
        assert_eq!(g.variant, FatVariant::Fat16);
        assert_eq!(g.sectors_per_cluster, 2);
        assert_eq!(g.root_entries, 512);
    }

    #[test]
    fn fat12_picks_larger_clusters_when_needed() {
        let mut dev = MemoryDevice::new(512, 16_000);
        let g = format_volume(&mut dev, &FormatOptions::new("fat12")).unwrap();
        assert_eq!(g.variant, FatVariant::Fat12);
        assert_eq!(g.sectors_per_cluster, 4);
    }

    #[test]
    fn mismatched_variant_is_rejected() {
        let mut dev = MemoryDevice::new(512, 2880);
        assert!(matches!(
            format_volume(&mut dev, &FormatOptions::new("fat32")),
            Err(FatError::InvalidInput(_))
        ));
        assert!(matches!(
            format_volume(&mut dev, &FormatOptions::new("fat16")),
            Err(FatError::InvalidInput(_))
        ));
    }

    #[test]
    fn exfat_and_unknown_types_are_unsupported() {
        let mut dev = MemoryDevice::new(512, 2880);
        assert!(matches!(
            format_volume(&mut dev, &FormatOptions::new("exfat")),
            Err(FatError::UnsupportedVariant(_))
        ));
        assert!(matches!(
            format_volume(&mut dev, &FormatOptions::new("ntfs")),
            Err(FatError::UnsupportedVariant(_))
        ));
    }

    #[test]
    fn bad_cluster_size_is_rejected() {
        let mut dev = MemoryDevice::new(512, 2880);
        let mut opts = FormatOptions::new("fat12");
        opts.cluster_size = Some(1000);
        assert!(matches!(format_volume(&mut dev, &opts), Err(FatError::InvalidInput(_))));
        opts.cluster_size = Some(1536);
        assert!(matches!(format_volume(&mut dev, &opts), Err(FatError::InvalidInput(_))));
    }

    #[test]
    fn tiny_device_is_rejected() {
        let mut dev = MemoryDevice::new(512, 8);
        assert!(matches!(
            format_volume(&mut dev, &FormatOptions::new("fat12")),
            Err(FatError::InvalidInput(_))
        ));
    }

    #[test]
    fn root_entries_round_up_to_a_sector() {
        let mut dev = MemoryDevice::new(512, 2880);
        let mut opts = FormatOptions::new("fat12");
        opts.root_entries = Some(20);
        let g = format_volume(&mut dev, &opts).unwrap();
        assert_eq!(g.root_entries, 32);
        assert_eq!(g.root_dir_sectors, 2);
    }
}
