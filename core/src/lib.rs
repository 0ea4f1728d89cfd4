pub mod device;
pub mod error;
pub mod filesystem;
pub mod test_utils;

pub use device::{BlockDevice, FileDevice, MemoryDevice, DEFAULT_SECTOR_SIZE};
pub use error::{FatError, FatResult};
pub use filesystem::{FormatOptions, MountOptions};
