use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Invalid staging path: {0:?}")]
    InvalidPath(String),

    #[error("Staged file not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk staging area: {0}")]
    Walk(String),
}

impl StagingError {
    /// Maps an I/O error on `path`, folding `NotFound` into its own variant.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            StagingError::NotFound(path)
        } else {
            StagingError::Io { path, source }
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to read staged content: {0}")]
    Body(#[from] std::io::Error),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Set {var}: {hint}")]
    Missing {
        var: &'static str,
        hint: &'static str,
    },

    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("{0} not supported")]
    NotSupported(&'static str),

    #[error(transparent)]
    Staging(#[from] StagingError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_folded() {
        let err = StagingError::io(
            "a/b.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, StagingError::NotFound(ref p) if p == "a/b.txt"));

        let err = StagingError::io(
            "a/b.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, StagingError::Io { .. }));
    }

    #[test]
    fn test_missing_config_message_names_variable() {
        let err = ConfigError::Missing {
            var: "FTP2S3_BUCKET",
            hint: "the S3 bucket uploads are stored in",
        };
        assert_eq!(
            err.to_string(),
            "Set FTP2S3_BUCKET: the S3 bucket uploads are stored in"
        );
    }
}
