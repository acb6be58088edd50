use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{BoxError, DownloadError, Result};
use crate::models::{ChunkState, Range};

/// A blocking primitive that returns the bytes of the inclusive range `start..=end`.
///
/// Calls cannot be interrupted once started; cancellation of a chunk is only observed
/// before and after the call.
pub trait RangeFetcher: Send + Sync {
    fn fetch_range(&self, start: u64, end: u64) -> std::result::Result<Vec<u8>, BoxError>;
}

impl<F> RangeFetcher for F
where
    F: Fn(u64, u64) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync,
{
    fn fetch_range(&self, start: u64, end: u64) -> std::result::Result<Vec<u8>, BoxError> {
        self(start, end)
    }
}

/// Shared, monotonic cancellation flag. Written by the coordinator, read by the task.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a chunk task that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Done { index: usize, size: u64 },
    Cancelled { index: usize },
}

/// Fetches one range and persists it to its own numbered file.
pub struct ChunkTask {
    range: Range,
    path: PathBuf,
    fetcher: Arc<dyn RangeFetcher>,
    cancel: CancelFlag,
    state: Mutex<ChunkState>,
    settled: watch::Sender<bool>,
}

impl ChunkTask {
    pub fn new(range: Range, path: PathBuf, fetcher: Arc<dyn RangeFetcher>) -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            range,
            path,
            fetcher,
            cancel: CancelFlag::new(),
            state: Mutex::new(ChunkState::Pending),
            settled,
        }
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn state(&self) -> ChunkState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Requests cancellation. An in-flight fetch is left to finish; its result is discarded.
    pub fn cancel(&self) {
        debug!("Cancelling task for chunk #{}", self.range.index);
        self.cancel.cancel();
    }

    /// Runs the blocking fetch-and-write. Must be called from a thread that may block.
    ///
    /// The settle signal fires on every path out of this function.
    pub fn run(&self) -> Result<ChunkOutcome> {
        let _settle = SettleGuard(&self.settled);
        let index = self.range.index;
        debug!("Started task for chunk #{}...", index);

        if self.cancel.is_cancelled() || !self.transition(ChunkState::Running) {
            debug!("Task for chunk #{} interrupted before start", index);
            self.transition(ChunkState::Cancelled);
            return Ok(ChunkOutcome::Cancelled { index });
        }

        match self.fetch_and_write() {
            Ok(()) if self.cancel.is_cancelled() => {
                debug!("Task for chunk #{} got interrupted. Cleaning up...", index);
                self.remove_file();
                self.transition(ChunkState::Cancelled);
                Ok(ChunkOutcome::Cancelled { index })
            }
            Ok(()) => {
                debug!("Task for chunk #{} finished", index);
                self.transition(ChunkState::Done);
                Ok(ChunkOutcome::Done { index, size: self.range.size() })
            }
            Err(e) => {
                debug!("Failed downloading chunk file {}: {}", self.path.display(), e);
                self.remove_file();
                self.transition(ChunkState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Marks a task that will never run (dropped from the pool queue) as cancelled.
    pub(crate) fn abandon(&self) {
        if self.transition(ChunkState::Cancelled) {
            debug!("Task for chunk #{} abandoned before start", self.range.index);
        }
        self.settled.send_replace(true);
    }

    /// Records a failure observed outside of `run`, such as a panicked worker.
    pub(crate) fn fail(&self, reason: &str) {
        self.transition(ChunkState::Failed(reason.to_string()));
        self.settled.send_replace(true);
    }

    /// Resolves once the task reached a terminal state.
    pub async fn wait_settled(&self) {
        let mut rx = self.settled.subscribe();
        let _ = rx.wait_for(|settled| *settled).await;
    }

    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    fn fetch_and_write(&self) -> Result<()> {
        let Range { index, start, end } = self.range;
        let bytes = self
            .fetcher
            .fetch_range(start, end)
            .map_err(|source| DownloadError::Fetch { index, start, end, source })?;
        debug!("Writing {} bytes to '{}'", bytes.len(), self.path.display());
        std::fs::write(&self.path, &bytes).map_err(|e| DownloadError::write(&self.path, e))
    }

    fn transition(&self, next: ChunkState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.can_move_to(&next) {
            *state = next;
            true
        } else {
            false
        }
    }

    fn remove_file(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove chunk file {}: {}", self.path.display(), e),
        }
    }
}

impl std::fmt::Debug for ChunkTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTask")
            .field("range", &self.range)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

struct SettleGuard<'a>(&'a watch::Sender<bool>);

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn task_in(dir: &Path, fetcher: Arc<dyn RangeFetcher>) -> ChunkTask {
        let range = Range { index: 2, start: 10, end: 19 };
        ChunkTask::new(range, dir.join("file.bin.2"), fetcher)
    }

    #[test]
    fn writes_fetched_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(|start: u64, end: u64| -> std::result::Result<Vec<u8>, BoxError> {
            Ok((start..=end).map(|b| b as u8).collect())
        });
        let task = task_in(dir.path(), fetcher);

        let outcome = task.run().unwrap();

        assert_eq!(outcome, ChunkOutcome::Done { index: 2, size: 10 });
        assert_eq!(task.state(), ChunkState::Done);
        assert_eq!(std::fs::read(task.path()).unwrap(), (10u8..=19).collect::<Vec<_>>());
        assert!(task.is_settled());
    }

    #[test]
    fn cancelled_before_start_never_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(move |_: u64, _: u64| -> std::result::Result<Vec<u8>, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0; 10])
        });
        let task = task_in(dir.path(), fetcher);
        task.cancel();

        assert_eq!(task.run().unwrap(), ChunkOutcome::Cancelled { index: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(task.state(), ChunkState::Cancelled);
        assert!(!task.path().exists());
        assert!(task.is_settled());
    }

    #[test]
    fn cancelled_mid_fetch_discards_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let flag = Arc::new(Mutex::new(None::<CancelFlag>));
        let shared = flag.clone();
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(move |_: u64, _: u64| -> std::result::Result<Vec<u8>, BoxError> {
            if let Some(flag) = shared.lock().unwrap().as_ref() {
                flag.cancel();
            }
            Ok(vec![1; 10])
        });
        let task = task_in(dir.path(), fetcher);
        *flag.lock().unwrap() = Some(task.cancel_flag());

        assert_eq!(task.run().unwrap(), ChunkOutcome::Cancelled { index: 2 });
        assert_eq!(task.state(), ChunkState::Cancelled);
        assert!(!task.path().exists());
    }

    #[test]
    fn fetch_failure_is_reraised() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(|_: u64, _: u64| -> std::result::Result<Vec<u8>, BoxError> {
            Err("connection reset".into())
        });
        let task = task_in(dir.path(), fetcher);

        let err = task.run().unwrap_err();

        assert!(matches!(err, DownloadError::Fetch { index: 2, start: 10, end: 19, .. }));
        assert!(matches!(task.state(), ChunkState::Failed(reason) if reason.contains("connection reset")));
        assert!(!task.path().exists());
        assert!(task.is_settled());
    }

    #[test]
    fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(|_: u64, _: u64| -> std::result::Result<Vec<u8>, BoxError> {
            Ok(vec![1; 10])
        });
        let range = Range { index: 0, start: 0, end: 9 };
        let task = ChunkTask::new(range, dir.path().join("missing").join("file.bin.0"), fetcher);

        assert!(matches!(task.run(), Err(DownloadError::Write { .. })));
        assert!(matches!(task.state(), ChunkState::Failed(_)));
    }

    #[tokio::test]
    async fn abandoned_task_settles() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(|_: u64, _: u64| -> std::result::Result<Vec<u8>, BoxError> {
            Ok(Vec::new())
        });
        let task = task_in(dir.path(), fetcher);

        task.abandon();
        task.wait_settled().await;

        assert_eq!(task.state(), ChunkState::Cancelled);
        assert_eq!(task.run().unwrap(), ChunkOutcome::Cancelled { index: 2 });
    }
}
