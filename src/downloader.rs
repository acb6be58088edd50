use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::channel::ConflatedChannel;
use crate::chunk::RangeFetcher;
use crate::config::DownloadConfig;
use crate::coordinator::ChunkCoordinator;
use crate::error::Result;
use crate::reporter::ProgressReporter;

/// Downloads `file_size` bytes through `fetcher` into `destination`, printing progress
/// to stdout. Completes once the destination is fully written and all scratch files
/// are gone.
pub async fn download<F>(
    destination: impl Into<PathBuf>,
    file_size: u64,
    chunk_size: u64,
    fetcher: F,
) -> Result<()>
where
    F: RangeFetcher + 'static,
{
    let config = DownloadConfig { chunk_size, ..DownloadConfig::default() };
    let downloader = Downloader::new(config)?;
    let coordinator = downloader.start(destination, file_size, Arc::new(fetcher)).await?;
    downloader.run(coordinator, std::io::stdout()).await
}

/// Runs chunked downloads with one configuration.
#[derive(Debug, Clone)]
pub struct Downloader {
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Submits every chunk. Take a [`ChunkCoordinator::handle`] before passing the
    /// coordinator to [`Downloader::run`] to be able to cancel.
    pub async fn start(
        &self,
        destination: impl Into<PathBuf>,
        file_size: u64,
        fetcher: Arc<dyn RangeFetcher>,
    ) -> Result<ChunkCoordinator> {
        ChunkCoordinator::start(destination, file_size, fetcher, &self.config).await
    }

    /// Drives a started download to its end while reporting progress into `out`.
    pub async fn run<W>(&self, mut coordinator: ChunkCoordinator, out: W) -> Result<()>
    where
        W: Write + Send + 'static,
    {
        let channel = ConflatedChannel::new();
        let reporter = ProgressReporter::spawn(
            self.config.operation.clone(),
            channel.clone(),
            self.config.report_interval,
            out,
        );

        let progress = coordinator.progress();
        let forward = async {
            if let Some(mut progress) = progress {
                while let Some(value) = progress.next().await {
                    if channel.send(value).is_err() {
                        break;
                    }
                }
            }
            channel.close();
        };

        let (result, ()) = tokio::join!(coordinator.wait(), forward);
        channel.close();
        reporter.join().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::error::{BoxError, DownloadError};

    #[test]
    fn rejects_invalid_configuration() {
        let config = DownloadConfig { parallelism: 0, ..DownloadConfig::default() };
        assert!(matches!(
            Downloader::new(config),
            Err(DownloadError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_reports_into_the_given_writer() {
        let root = tempfile::tempdir().unwrap();
        let destination = root.path().join("report.bin");
        let config = DownloadConfig { chunk_size: 16, parallelism: 3, ..DownloadConfig::default() };
        let downloader = Downloader::new(config).unwrap();
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(|start: u64, end: u64| -> std::result::Result<Vec<u8>, BoxError> {
            Ok(vec![b'x'; (end - start + 1) as usize])
        });

        let coordinator = downloader.start(&destination, 100, fetcher).await.unwrap();
        let out = tempfile::tempfile().unwrap();
        downloader.run(coordinator, out).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), vec![b'x'; 100]);
    }
}
