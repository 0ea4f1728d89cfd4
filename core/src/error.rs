use thiserror::Error;

#[derive(Debug, Error)]
pub enum FatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid boot sector: {0}")]
    InvalidBootSector(String),

    #[error("Unsupported FAT variant: {0}")]
    UnsupportedVariant(String),

    #[error("No free clusters left on the volume")]
    NoSpace,

    #[error("Root directory is full")]
    DirectoryFull,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    DuplicateName(String),

    #[error("Bad cluster encountered in chain at cluster {0}")]
    BadCluster(u32),

    #[error("Corrupt cluster chain: {0}")]
    CorruptChain(String),

    #[error("Invalid 8.3 file name: {0}")]
    InvalidName(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Volume is mounted read-only")]
    ReadOnly,

    #[error("Filesystem lock poisoned by a panicked operation")]
    LockPoisoned,
}

pub type FatResult<T> = Result<T, FatError>;

impl FatError {
    /// True for failures that leave the volume untouched and may be retried
    /// after the caller frees space or picks another name.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FatError::NoSpace
                | FatError::DirectoryFull
                | FatError::NotFound(_)
                | FatError::DuplicateName(_)
                | FatError::InvalidName(_)
        )
    }
}
