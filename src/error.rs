//! Errors that abort a sync run.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A remote document could not be retrieved or was not valid JSON.
    #[error("cannot fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: FetchFailure,
    },

    /// The index document does not have the expected shape.
    #[error("invalid index document: {0}")]
    Parse(String),

    #[error("cannot access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Staging, committing or pushing failed.
    #[error("cannot publish changes")]
    Publish(#[source] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("request failed: {0}")]
    Request(#[from] ureq::Error),
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
