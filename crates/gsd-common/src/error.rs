//! Error types for GSD file operations.

use thiserror::Error;

/// Result type alias using GsdError.
pub type Result<T> = std::result::Result<T, GsdError>;

/// Errors that can occur when operating on a GSD file.
#[derive(Debug, Error)]
pub enum GsdError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File identification errors
    #[error("not a GSD file")]
    NotAGsdFile,

    #[error("invalid GSD file version: {0:#x}")]
    InvalidVersion(u32),

    // Structural errors
    #[error("file corrupt: {0}")]
    FileCorrupt(String),

    #[error("memory allocation failed")]
    MemoryAllocationFailed,

    // Name table errors
    #[error("name list is full")]
    NamelistFull,

    // Open mode errors
    #[error("file must be writable")]
    FileMustBeWritable,

    #[error("file must be readable")]
    FileMustBeReadable,

    // Caller errors
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
