use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompoundError {
    #[error("Invalid signature in compound file header")]
    InvalidSignature,

    #[error("Unsupported format version: {major}")]
    UnsupportedVersion { major: u16 },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Corrupted compound file: {0}")]
    Corrupted(String),

    #[error("Compound file closed")]
    Disposed,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Duplicated item: {0}")]
    DuplicatedItem(String),

    #[error("Invalid entry name: {0}")]
    InvalidName(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl CompoundError {
    /// Signature, version or header layout problems. Always fatal on load.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            CompoundError::InvalidSignature
                | CompoundError::UnsupportedVersion { .. }
                | CompoundError::InvalidHeader(_)
        )
    }

    /// Structural damage that lenient loading may swallow.
    pub fn is_corruption(&self) -> bool {
        matches!(self, CompoundError::Corrupted(_))
    }
}

pub type Result<T> = std::result::Result<T, CompoundError>;
