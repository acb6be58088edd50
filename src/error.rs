use std::path::PathBuf;
use thiserror::Error;

use crate::channel::ChannelClosed;
use crate::config::ConfigError;

/// Boxed error returned by a transport's range fetch.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors a chunked download can end with.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("could not create directory {}: {source}", .path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed fetching chunk #{index} (bytes {start}-{end}): {source}")]
    Fetch {
        index: usize,
        start: u64,
        end: u64,
        #[source]
        source: BoxError,
    },

    #[error("failed writing {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    ChannelClosed(#[from] ChannelClosed),

    #[error("download cancelled")]
    Cancelled,

    #[error("worker error: {0}")]
    Worker(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DownloadError {
    /// Cancellation is an expected outcome, not a failure to report.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Write { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
