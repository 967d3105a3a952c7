//! Crate-wide structured error type. Scanners and the block layer return
//! `CoreError`; the CLI and top-level convenience functions wrap it in
//! `anyhow::Result` the way the teacher's CLI did for `RecoveryError`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} stream does not support seeking backward (requested {requested}, cursor at {cursor})")]
    NonMonotonic {
        kind: &'static str,
        requested: u64,
        cursor: u64,
    },

    #[error("read past end of target (offset {offset}, len {len}, target size {size})")]
    OutOfBounds { offset: u64, len: usize, size: u64 },

    #[error("unrecognized or corrupt {structure} at offset {offset}")]
    Corrupt {
        structure: &'static str,
        offset: u64,
    },

    #[error("unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),

    #[error("scan was cancelled")]
    Cancelled,

    #[error("session {0} not found")]
    SessionNotFound(uuid::Uuid),

    #[error("session storage error: {0}")]
    Session(#[from] rusqlite::Error),

    #[error("no permission to read {0}; elevated access required")]
    AccessDenied(PathBuf),
}
