use std::io;
use thiserror::Error;

/// Errors surfaced by the filesystem adapter and its backends.
///
/// Remote failures that are not one of the named conditions pass through
/// unmodified (`Io`, `Sqlx`, `Json`).
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("file already exists at path: {0}")]
    AlreadyExists(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("`{0}` is a directory")]
    IsDirectory(String),
    #[error("directory `{0}` is not empty")]
    DirectoryNotEmpty(String),
    #[error("no more listings in [{0}]")]
    NoSuchElement(String),
    #[error("{0} is closed")]
    Closed(String),
    #[error("invalid number of bytes [{0}] for MD5 checksum")]
    InvalidChecksumLength(usize),
    #[error("invalid hex string for MD5 checksum: {0}")]
    InvalidChecksumHex(#[from] hex::FromHexError),
    #[error("checksum job [{job}] failed: {message}")]
    ChecksumComputationFailed {
        job: String,
        message: String,
        #[source]
        source: Option<Box<FsError>>,
    },
    #[error("job [{job}] failed: {message}")]
    JobFailed { job: String, message: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Shortcut for a missing remote key.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Shortcut for a failed checksum job without an underlying cause.
    pub fn checksum_failed(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChecksumComputationFailed {
            job: job.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a lower-level failure as a checksum job failure.
    pub fn checksum_failed_by(
        job: impl Into<String>,
        message: impl Into<String>,
        cause: FsError,
    ) -> Self {
        Self::ChecksumComputationFailed {
            job: job.into(),
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// True when the error means the remote key does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Process exit code used by the shell for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NotFound(_) => 2,
            Self::InvalidPath(_) | Self::Unsupported(_) => 3,
            Self::AlreadyExists(_) | Self::IsDirectory(_) | Self::DirectoryNotEmpty(_) => 4,
            Self::InvalidChecksumLength(_)
            | Self::InvalidChecksumHex(_)
            | Self::ChecksumComputationFailed { .. }
            | Self::JobFailed { .. } => 5,
            _ => 1,
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io(inner) => inner,
            FsError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            FsError::AlreadyExists(_) => io::Error::new(io::ErrorKind::AlreadyExists, err),
            FsError::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            other => io::Error::other(other),
        }
    }
}
