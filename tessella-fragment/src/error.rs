//! Error types for fragment read operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FragmentError {
    #[error("I/O error for '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("mmap failed for '{path}': {source}")]
    Mmap { path: PathBuf, source: io::Error },

    #[error("decompression failed for '{path}': {detail}")]
    Decompress { path: PathBuf, detail: String },

    #[error("allocation of {0} bytes failed")]
    OutOfMemory(usize),

    #[error("book-keeping inconsistency: {0}")]
    Invariant(String),
}

impl FragmentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FragmentError::Io { path: path.into(), source }
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        FragmentError::Invariant(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FragmentError>;
