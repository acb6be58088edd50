pub mod channel;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod downloader;
pub mod error;
pub mod http;
pub mod models;
pub mod planner;
pub mod pool;
pub mod progress;
pub mod reporter;
pub mod temp_dir;

pub use downloader::download;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::channel::{ChannelClosed, ConflatedChannel};
    pub use crate::chunk::{CancelFlag, ChunkOutcome, ChunkTask, RangeFetcher};
    pub use crate::config::DownloadConfig;
    pub use crate::coordinator::{ChunkCoordinator, CoordinatorHandle, CoordinatorState};
    pub use crate::downloader::{download, Downloader};
    pub use crate::error::{BoxError, DownloadError};
    pub use crate::http::HttpSource;
    pub use crate::models::{ChunkState, FileMetadata, Progress, Range};
    pub use crate::progress::ProgressAggregator;
    pub use crate::reporter::ProgressReporter;
}
