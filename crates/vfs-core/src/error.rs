//! Error taxonomy shared by every component (spec §7).
//!
//! Errors are grouped by *kind*, not by component: a `Error::DirNotFound`
//! can come from the directory cache, the path router, or an adapter's
//! listing call alike.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // --- transient / auth / rate-limited: recovered locally by the pacer,
    // only surfaced once the retry budget is exhausted ---
    #[error("transient error after retries exhausted: {0}")]
    Transient(String),

    #[error("authentication expired and could not be renewed")]
    AuthExpired,

    #[error("rate limited, retry after {0:?}")]
    RateLimited(std::time::Duration),

    // --- not found / is-file / is-dir ---
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("directory not found: {0}")]
    DirNotFound(String),

    #[error("path is a file, not a directory: {0}")]
    IsFile(String),

    #[error("path is a directory, not a file: {0}")]
    IsDir(String),

    // --- conflict ---
    #[error("directory already exists: {0}")]
    DirExists(String),

    #[error("directory not empty: {0}")]
    DirNotEmpty(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    // --- unsupported capability ---
    #[error("SetModTime not supported")]
    CantSetModTime,
    #[error("server-side copy not supported")]
    CantCopy,
    #[error("server-side move not supported")]
    CantMove,
    #[error("server-side directory move not supported")]
    CantDirMove,
    #[error("upload not supported: {0}")]
    CantUpload(String),
    #[error("streaming upload (unknown size) not supported")]
    CantStream,
    #[error("hash type not supported: {0}")]
    HashUnsupported(String),
    #[error("capability not supported: {0}")]
    Unsupported(&'static str),

    // --- invalid input ---
    #[error("bad year: {0}")]
    BadYear(String),
    #[error("bad month: {0}")]
    BadMonth(String),
    #[error("bad day: {0}")]
    BadDay(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid chunk number: {0}")]
    InvalidChunkNumber(i64),

    // --- provider-specific, carried verbatim ---
    #[error("provider error {status}: [{code}] {message}")]
    Provider {
        code: String,
        message: String,
        status: u16,
    },

    // --- plumbing ---
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "reqwest-client")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient/auth/rate-limited errors are the only ones the pacer retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transient(_) | Error::AuthExpired | Error::RateLimited(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound(_) | Error::DirNotFound(_))
    }
}
