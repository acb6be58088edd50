use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{Progress, Range};

/// Turns chunk completions into cumulative progress.
///
/// Completions arrive in the order chunks finish, not in range order. The sequence
/// yields once per chunk and ends after the last one, or early once the download is
/// stopped by a failure or cancellation. It cannot be restarted.
#[derive(Debug)]
pub struct ProgressAggregator {
    completions: mpsc::UnboundedReceiver<Range>,
    stop: CancellationToken,
    received: u64,
    total: u64,
    remaining: usize,
}

impl ProgressAggregator {
    pub(crate) fn new(
        completions: mpsc::UnboundedReceiver<Range>,
        stop: CancellationToken,
        total: u64,
        chunks: usize,
    ) -> Self {
        Self { completions, stop, received: 0, total, remaining: chunks }
    }

    pub fn bytes_total(&self) -> u64 {
        self.total
    }

    /// Next cumulative value, or `None` once the sequence is over.
    pub async fn next(&mut self) -> Option<Progress> {
        if self.remaining == 0 {
            return None;
        }
        let completed = tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            range = self.completions.recv() => range,
        };
        match completed {
            Some(range) => {
                self.remaining -= 1;
                self.received = (self.received + range.size()).min(self.total);
                Some(Progress::new(self.received, self.total))
            }
            None => {
                self.remaining = 0;
                None
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Progress> {
        futures_util::stream::unfold(self, |mut aggregator| async move {
            let progress = aggregator.next().await?;
            Some((progress, aggregator))
        })
    }
}
