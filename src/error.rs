use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the prediction pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("model {0} not found")]
    ModelNotFound(String),

    #[error("feature length mismatch: got {got}, expected {expected}")]
    FeatureLength { got: usize, expected: usize },

    #[error("feature {name} (index {index}) is not finite")]
    NonFiniteFeature { index: usize, name: String },

    #[error("invalid model name: {0}")]
    InvalidModelName(String),

    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("batch of {got} requests exceeds the limit of {limit}")]
    BatchTooLarge { got: usize, limit: usize },

    #[error("prediction worker failed: {0}")]
    Worker(String),

    #[cfg(feature = "torch")]
    #[error("torch backend: {0}")]
    Torch(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Json {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the caller's input rather than the server.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::FeatureLength { .. } | Error::NonFiniteFeature { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
