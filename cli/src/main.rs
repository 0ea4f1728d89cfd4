use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use kfat_core::{FatError, FileDevice, FormatOptions, MountOptions, DEFAULT_SECTOR_SIZE};
use kfat_filesystems::{format_volume, FatFileSystem};
use log::debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "kfat")]
#[command(about = "Format, inspect and edit FAT12/16/32 disk images", long_about = None)]
struct Cli {
    /// Log engine activity (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a fresh FAT volume on an image
    Format {
        /// Image file (created when --sectors is given)
        image: PathBuf,
        /// Filesystem type (fat12, fat16, fat32)
        #[arg(short, long)]
        filesystem: String,
        /// Create or resize the image to this many 512-byte sectors
        #[arg(long)]
        sectors: Option<u64>,
        #[arg(short, long)]
        label: Option<String>,
        /// Cluster size in bytes
        #[arg(short, long)]
        cluster_size: Option<u32>,
        /// Root directory entries (FAT12/16)
        #[arg(long)]
        root_entries: Option<u16>,
        /// Zero the data region as well
        #[arg(long)]
        full: bool,
    },
    /// Show volume geometry and usage
    Info {
        image: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the root directory
    Ls { image: PathBuf },
    /// Write a file's contents to stdout
    Cat { image: PathBuf, name: String },
    /// Copy a host file into the root directory, replacing an existing file
    Put {
        image: PathBuf,
        source: PathBuf,
        /// 8.3 name on the volume; defaults to the source file name
        name: Option<String>,
    },
    /// Append a host file to a file on the volume
    Append {
        image: PathBuf,
        source: PathBuf,
        name: String,
    },
    /// Shrink a file to the given length
    Truncate { image: PathBuf, name: String, len: u32 },
    /// Delete a file
    Rm { image: PathBuf, name: String },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
}

fn open_image(path: &Path) -> anyhow::Result<FatFileSystem<FileDevice>> {
    let device = FileDevice::open(path, DEFAULT_SECTOR_SIZE)
        .with_context(|| format!("Failed to open image {}", path.display()))?;
    FatFileSystem::mount(device).with_context(|| format!("Failed to mount {}", path.display()))
}

fn open_image_read_only(path: &Path) -> anyhow::Result<FatFileSystem<FileDevice>> {
    let device = FileDevice::open_read_only(path, DEFAULT_SECTOR_SIZE)
        .with_context(|| format!("Failed to open image {}", path.display()))?;
    FatFileSystem::mount_with_options(device, MountOptions::read_only())
        .with_context(|| format!("Failed to mount {}", path.display()))
}

fn close(fs: FatFileSystem<FileDevice>, path: &Path) -> anyhow::Result<()> {
    fs.unmount()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

fn default_name(source: &Path) -> anyhow::Result<String> {
    match source.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_uppercase()),
        None => bail!("Cannot derive a volume name from {}", source.display()),
    }
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Format {
            image,
            filesystem,
            sectors,
            label,
            cluster_size,
            root_entries,
            full,
        } => {
            let mut device = match sectors {
                Some(count) => FileDevice::create(&image, DEFAULT_SECTOR_SIZE, count)
                    .with_context(|| format!("Failed to create image {}", image.display()))?,
                None => FileDevice::open(&image, DEFAULT_SECTOR_SIZE)
                    .with_context(|| format!("Failed to open image {}", image.display()))?,
            };

            let mut options = FormatOptions::new(&filesystem);
            options.label = label;
            options.cluster_size = cluster_size;
            options.root_entries = root_entries;
            options.quick_format = !full;

            let geometry = format_volume(&mut device, &options)
                .with_context(|| format!("Failed to format {} as {}", image.display(), filesystem))?;
            println!(
                "Formatted {} as {}: {} clusters of {} bytes",
                image.display(),
                geometry.variant,
                geometry.total_clusters,
                geometry.bytes_per_cluster()
            );
        }
        Commands::Info { image, json } => {
            let fs = open_image_read_only(&image)?;
            let info = fs.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }

            let g = &info.geometry;
            println!("Image:            {}", image.display());
            println!("Variant:          {}", info.variant);
            println!("Label:            {}", info.label.as_deref().unwrap_or("(none)"));
            println!("Serial:           {:04X}-{:04X}", info.serial >> 16, info.serial & 0xFFFF);
            println!("Bytes/sector:     {}", g.bytes_per_sector);
            println!("Sectors/cluster:  {}", g.sectors_per_cluster);
            println!("Reserved sectors: {}", g.reserved_sectors);
            println!("FATs:             {} x {} sectors", g.num_fats, g.sectors_per_fat);
            println!("First data LBA:   {}", g.first_data_sector);
            println!(
                "Clusters:         {} total, {} free ({} KiB free)",
                info.total_clusters,
                info.free_clusters,
                info.free_clusters as u64 * info.bytes_per_cluster as u64 / 1024
            );
            if let Some(fs_info) = fs.fs_info() {
                debug!("FSInfo: {:?}", fs_info);
            }
        }
        Commands::Ls { image } => {
            let mut fs = open_image_read_only(&image)?;
            let entries = fs.list_root().context("Failed to read the root directory")?;
            for entry in &entries {
                let modified = entry
                    .modified()
                    .to_datetime()
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let kind = if entry.attributes.is_directory() { "<DIR>" } else { "" };
                println!("{:<12} {:>10} {:>5} {}", entry.name.to_string(), entry.file_size, kind, modified);
            }
            println!("{} file(s), {} cluster(s) free", entries.len(), fs.free_cluster_count());
        }
        Commands::Cat { image, name } => {
            let mut fs = open_image_read_only(&image)?;
            let data = fs
                .read_file(&name)
                .with_context(|| format!("Failed to read {}", name))?;
            io::stdout().write_all(&data)?;
        }
        Commands::Put { image, source, name } => {
            let name = match name {
                Some(name) => name,
                None => default_name(&source)?,
            };
            let data = fs::read(&source).with_context(|| format!("Failed to read {}", source.display()))?;

            let mut fs = open_image(&image)?;
            let entry = match fs.write_file(&name, &data) {
                Err(FatError::NotFound(_)) => fs.create_file(&name, &data),
                other => other,
            }
            .with_context(|| format!("Failed to store {}", name))?;
            println!("Stored {} ({} bytes)", entry.name, entry.file_size);
            close(fs, &image)?;
        }
        Commands::Append { image, source, name } => {
            let data = fs::read(&source).with_context(|| format!("Failed to read {}", source.display()))?;
            let mut fs = open_image(&image)?;
            let entry = fs
                .append_file(&name, &data)
                .with_context(|| format!("Failed to append to {}", name))?;
            println!("{} is now {} bytes", entry.name, entry.file_size);
            close(fs, &image)?;
        }
        Commands::Truncate { image, name, len } => {
            let mut fs = open_image(&image)?;
            fs.truncate_file(&name, len)
                .with_context(|| format!("Failed to truncate {}", name))?;
            close(fs, &image)?;
        }
        Commands::Rm { image, name } => {
            let mut fs = open_image(&image)?;
            fs.delete_file(&name)
                .with_context(|| format!("Failed to delete {}", name))?;
            close(fs, &image)?;
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli.command) {
        eprintln!("Error: {:#}", err);
        let recoverable = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<FatError>())
            .map_or(false, FatError::is_recoverable);
        if recoverable {
            std::process::exit(1);
        }
        // Anything else may have left the image inconsistent.
        eprintln!("The image may need checking before further use.");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfat_filesystems::probe_variant;

    #[test]
    fn parses_put_with_default_name() {
        let cli = Cli::try_parse_from(["kfat", "put", "disk.img", "notes.txt"]).unwrap();
        match cli.command {
            Commands::Put { name, source, .. } => {
                assert!(name.is_none());
                assert_eq!(default_name(&source).unwrap(), "NOTES.TXT");
            }
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn verbose_flag_is_global() {
        let cli = Cli::try_parse_from(["kfat", "ls", "disk.img", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn format_requires_filesystem() {
        assert!(Cli::try_parse_from(["kfat", "format", "disk.img"]).is_err());
    }

    #[test]
    fn format_then_put_and_cat_through_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        let source = dir.path().join("hello.txt");
        fs::write(&source, b"hello from the host").unwrap();

        run(Commands::Format {
            image: image.clone(),
            filesystem: "fat12".into(),
            sectors: Some(2880),
            label: Some("TEST".into()),
            cluster_size: None,
            root_entries: None,
            full: false,
        })
        .unwrap();
        run(Commands::Put {
            image: image.clone(),
            source,
            name: None,
        })
        .unwrap();

        let mut fs = open_image_read_only(&image).unwrap();
        assert_eq!(fs.read_file("HELLO.TXT").unwrap(), b"hello from the host");
        assert_eq!(fs.info().label.as_deref(), Some("TEST"));

        let err = run(Commands::Rm {
            image: image.clone(),
            name: "MISSING.TXT".into(),
        })
        .unwrap_err();
        assert!(err.chain().any(|c| matches!(c.downcast_ref::<FatError>(), Some(FatError::NotFound(_)))));
    }

    #[test]
    fn probe_sees_formatted_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        run(Commands::Format {
            image: image.clone(),
            filesystem: "fat16".into(),
            sectors: Some(20_000),
            label: None,
            cluster_size: None,
            root_entries: None,
            full: false,
        })
        .unwrap();
        let bytes = fs::read(&image).unwrap();
        assert!(probe_variant(&bytes[..512]).is_ok());
    }
}
