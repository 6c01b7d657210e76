use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures that stop a whole run. Everything else is an [`ItemError`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Source directory not found: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Could not read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not create output root {path}: {source}")]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Journal error: {0}")]
    Journal(#[from] crate::journal::JournalError),
}

/// A per-item failure. Collected into reports, never propagated past the
/// item or group that produced it.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Destination already exists: {from} -> {to}")]
    DestinationConflict { from: PathBuf, to: PathBuf },

    #[error("Permission denied: {path}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} shares its thumbnail name with {existing}")]
    NameCollision { path: PathBuf, existing: PathBuf },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ItemError {
    /// Classify an IO failure on `path`, splitting out permission problems.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::PermissionDenied => ItemError::PermissionDenied {
                path: path.to_path_buf(),
                source,
            },
            io::ErrorKind::AlreadyExists => ItemError::DestinationConflict {
                from: path.to_path_buf(),
                to: path.to_path_buf(),
            },
            _ => ItemError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::Decode { .. } => "decode",
            ItemError::DestinationConflict { .. } => "destination_conflict",
            ItemError::PermissionDenied { .. } => "permission_denied",
            ItemError::NameCollision { .. } => "name_collision",
            ItemError::Io { .. } => "io",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ItemError::Decode { path, .. }
            | ItemError::PermissionDenied { path, .. }
            | ItemError::NameCollision { path, .. }
            | ItemError::Io { path, .. } => path,
            ItemError::DestinationConflict { from, .. } => from,
        }
    }

    pub fn to_report(&self) -> ItemErrorReport {
        ItemErrorReport {
            kind: self.kind().to_string(),
            path: self.path().to_string_lossy().into_owned(),
            message: self.to_string(),
        }
    }
}

/// Serializable view of an [`ItemError`] for `--json` summaries.
#[derive(Debug, Clone, Serialize)]
pub struct ItemErrorReport {
    pub kind: String,
    pub path: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_errors_are_classified() {
        let err = ItemError::from_io(
            Path::new("/photos/a.jpg"),
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, ItemError::PermissionDenied { .. }));
        assert_eq!(err.kind(), "permission_denied");
        assert_eq!(err.path(), Path::new("/photos/a.jpg"));
    }

    #[test]
    fn test_report_carries_message() {
        let err = ItemError::DestinationConflict {
            from: PathBuf::from("/src/a.jpg"),
            to: PathBuf::from("/out/group_1/a.jpg"),
        };
        let report = err.to_report();
        assert_eq!(report.kind, "destination_conflict");
        assert_eq!(report.path, "/src/a.jpg");
        assert!(report.message.contains("group_1"));
    }
}
