use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DedupeError>;

#[derive(Debug, Error)]
pub enum DedupeError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("selected files are not one duplicate group: {0}")]
    InconsistentGroup(String),
    #[error("unsafe path: {0}")]
    UnsafePath(String),
    #[error("destination already exists: {}", .0.display())]
    Conflict(PathBuf),
    #[error("scan {0} is already running")]
    ScanInProgress(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable, machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InconsistentGroup,
    UnsafePath,
    Conflict,
    ScanInProgress,
    InvalidArgument,
    IoError,
    PersistenceError,
    ConfigError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InconsistentGroup => "inconsistent_group",
            ErrorKind::UnsafePath => "unsafe_path",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ScanInProgress => "scan_in_progress",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::IoError => "io_error",
            ErrorKind::PersistenceError => "persistence_error",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DedupeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DedupeError::NotFound(_) => ErrorKind::NotFound,
            DedupeError::InconsistentGroup(_) => ErrorKind::InconsistentGroup,
            DedupeError::UnsafePath(_) => ErrorKind::UnsafePath,
            DedupeError::Conflict(_) => ErrorKind::Conflict,
            DedupeError::ScanInProgress(_) => ErrorKind::ScanInProgress,
            DedupeError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DedupeError::Io { .. } => ErrorKind::IoError,
            DedupeError::Persistence(_) => ErrorKind::PersistenceError,
            DedupeError::Config(_) => ErrorKind::ConfigError,
            DedupeError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DedupeError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for DedupeError {
    fn from(err: tokio::task::JoinError) -> Self {
        DedupeError::Internal(format!("worker task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_codes() {
        assert_eq!(
            DedupeError::NotFound("task scan_1".into()).kind().as_str(),
            "not_found"
        );
        assert_eq!(
            DedupeError::Conflict(PathBuf::from("/out/a.txt")).kind(),
            ErrorKind::Conflict
        );
        let io = DedupeError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(io.kind().to_string(), "io_error");
        assert!(io.to_string().contains("/tmp/x"));
        assert_eq!(
            serde_json::to_string(&ErrorKind::InconsistentGroup).unwrap(),
            "\"inconsistent_group\""
        );
    }
}
