//! Error types for the scene graph library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for scene graph operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid magic bytes at start of a cache file
    #[error("Invalid cache file: expected SG3DCACH magic bytes")]
    InvalidMagic,

    /// Unsupported cache format version
    #[error("Unsupported cache version: {0}")]
    UnsupportedVersion(u32),

    /// File is truncated or corrupted
    #[error("Unexpected end of file at position {0}")]
    UnexpectedEof(u64),

    /// Invalid data structure in file
    #[error("Invalid file structure: {0}")]
    InvalidStructure(String),

    /// Node tag did not match the expected node kind
    #[error("Tag mismatch at position {pos}: expected {expected}, got '{actual}'")]
    TagMismatch {
        pos: u64,
        expected: &'static str,
        actual: String,
    },

    /// A referenced node name could not be resolved
    #[error("Unresolved node reference: {0}")]
    UnresolvedRef(String),

    /// A resolved reference has the wrong node kind
    #[error("Node kind mismatch for '{name}': expected {expected}, got {actual}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Nothing to write (graph has no drawable content)
    #[error("Empty scene graph")]
    EmptyGraph,

    /// Illegal parent/child kind pairing
    #[error("Invalid parent: {child} cannot be parented by {parent}")]
    InvalidParent {
        child: &'static str,
        parent: &'static str,
    },

    /// Write operation failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<std::fmt::Error> for Error {
    fn from(_: std::fmt::Error) -> Self {
        Error::WriteFailed("text formatting error".into())
    }
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }
}

/// Result type alias for scene graph operations.
pub type Result<T> = std::result::Result<T, Error>;
