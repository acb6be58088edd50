// src/coordinator.rs

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chunk::{ChunkOutcome, ChunkTask, RangeFetcher};
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result};
use crate::models::{ChunkState, Range};
use crate::planner;
use crate::pool::{PoolError, PoolHandle, WorkerPool};
use crate::progress::ProgressAggregator;
use crate::temp_dir::TempDirectory;

/// Lifecycle of one chunked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Planning,
    Running,
    Succeeded,
    Cancelled,
    Failed,
}

impl CoordinatorState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Cancelled | Self::Failed)
    }
}

/// State reachable from both the coordinator and its cancel handles.
#[derive(Debug)]
struct Shared {
    tasks: Vec<Arc<ChunkTask>>,
    pool: WorkerPool,
    stop: CancellationToken,
    state: Mutex<CoordinatorState>,
    cancel_requested: AtomicBool,
}

impl Shared {
    fn state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: CoordinatorState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.is_finished() {
            debug!("Coordinator state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Fans the stop out to every chunk and drops queued work. Idempotent.
    fn stop_all(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        debug!("Cancelling task for all chunks");
        for task in &self.tasks {
            task.cancel();
        }
        self.pool.shutdown(true);
        self.stop.cancel();
    }

    fn cancel(&self) {
        if self.state().is_finished() {
            return;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.stop_all();
    }
}

/// Cloneable handle used to cancel a download from outside the task awaiting it.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    shared: Arc<Shared>,
}

impl CoordinatorHandle {
    /// Requests cancellation. Safe to call any number of times, also after the
    /// download finished; it never fails.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn state(&self) -> CoordinatorState {
        self.shared.state()
    }

    /// Per-chunk state, in range order.
    pub fn chunk_states(&self) -> Vec<ChunkState> {
        self.shared.tasks.iter().map(|task| task.state()).collect()
    }
}

/// Stops the workers if the coordinator is dropped without being awaited.
#[derive(Debug)]
struct StopOnDrop(Arc<Shared>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if !self.0.state().is_finished() {
            self.0.stop_all();
        }
    }
}

/// Splits one remote file into ranges, fetches them on a bounded worker pool and
/// reassembles the pieces, in range order, into the destination file.
#[derive(Debug)]
pub struct ChunkCoordinator {
    guard: StopOnDrop,
    shared: Arc<Shared>,
    handles: Vec<PoolHandle<Result<ChunkOutcome>>>,
    progress: Option<ProgressAggregator>,
    temp_dir: TempDirectory,
    file_name: String,
    destination: PathBuf,
    file_size: u64,
}

impl ChunkCoordinator {
    /// Plans the ranges, creates the scratch directory and submits every chunk.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        destination: impl Into<PathBuf>,
        file_size: u64,
        fetcher: Arc<dyn RangeFetcher>,
        config: &DownloadConfig,
    ) -> Result<Self> {
        let destination = destination.into();
        let file_name = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DownloadError::InvalidInput(format!("{} has no file name", destination.display()))
            })?;

        let ranges = planner::plan(file_size, config.chunk_size)?;
        debug!("Planned {} chunks of up to {} bytes for '{}'", ranges.len(), config.chunk_size, file_name);

        let temp_root = config
            .temp_root
            .clone()
            .unwrap_or_else(|| parent_or_current(&destination));
        let mut temp_dir = TempDirectory::create(temp_root.join(TempDirectory::name_for(&file_name))).await?;

        let tasks: Vec<Arc<ChunkTask>> = ranges
            .iter()
            .map(|range| {
                let path = temp_dir.path().join(format!("{}.{}", file_name, range.index));
                temp_dir.track(path.clone());
                Arc::new(ChunkTask::new(*range, path, fetcher.clone()))
            })
            .collect();

        let shared = Arc::new(Shared {
            tasks,
            pool: WorkerPool::new(config.parallelism),
            stop: CancellationToken::new(),
            state: Mutex::new(CoordinatorState::Planning),
            cancel_requested: AtomicBool::new(false),
        });

        let (events, completions) = mpsc::unbounded_channel::<Range>();
        let handles = shared
            .tasks
            .iter()
            .map(|task| {
                let task = task.clone();
                let events = events.clone();
                shared.pool.submit(move || {
                    let outcome = task.run();
                    if let Ok(ChunkOutcome::Done { .. }) = outcome {
                        let _ = events.send(task.range());
                    }
                    outcome
                })
            })
            .collect();
        drop(events);

        let progress = ProgressAggregator::new(completions, shared.stop.clone(), file_size, shared.tasks.len());
        shared.set_state(CoordinatorState::Running);
        info!(
            "Downloading '{}' ({} bytes) in {} chunks with {} workers",
            file_name,
            file_size,
            shared.tasks.len(),
            shared.pool.parallelism()
        );

        Ok(Self {
            guard: StopOnDrop(shared.clone()),
            shared,
            handles,
            progress: Some(progress),
            temp_dir,
            file_name,
            destination,
            file_size,
        })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle { shared: self.shared.clone() }
    }

    /// The progress sequence of this download. Available once.
    pub fn progress(&mut self) -> Option<ProgressAggregator> {
        self.progress.take()
    }

    pub fn state(&self) -> CoordinatorState {
        self.shared.state()
    }

    pub fn number_of_chunks(&self) -> usize {
        self.shared.tasks.len()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn chunk_states(&self) -> Vec<ChunkState> {
        self.handle().chunk_states()
    }

    pub fn all_settled(&self) -> bool {
        self.shared.tasks.iter().all(|task| task.is_settled())
    }

    /// Same as [`CoordinatorHandle::cancel`].
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Cancels and waits for every chunk to settle and the scratch directory to be removed.
    pub async fn cancel_and_wait(self) {
        self.cancel();
        match self.wait().await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => debug!("Download ended with {} while cancelling", e),
        }
    }

    /// Waits until every chunk settled, then reassembles on success.
    ///
    /// The scratch directory is removed on every path out of this function. The first
    /// chunk error cancels all siblings and is the error returned.
    pub async fn wait(self) -> Result<()> {
        let ChunkCoordinator { guard, shared, handles, temp_dir, file_name, destination, .. } = self;

        let first_error = settle_all(&shared, handles).await;
        shared.pool.shutdown(true);
        let result = match first_error {
            Some(e) => Err(e),
            None if shared.cancel_requested.load(Ordering::SeqCst) => Err(DownloadError::Cancelled),
            None if shared.tasks.iter().any(|task| task.state() != ChunkState::Done) => {
                Err(DownloadError::Cancelled)
            }
            None => reassemble(&shared.tasks, &temp_dir, &file_name, &destination).await,
        };

        temp_dir.cleanup().await;

        match &result {
            Ok(()) => {
                info!("Finished writing '{}'", destination.display());
                shared.set_state(CoordinatorState::Succeeded);
            }
            Err(DownloadError::Cancelled) => {
                info!("Download of '{}' cancelled", file_name);
                shared.set_state(CoordinatorState::Cancelled);
            }
            Err(e) => {
                error!("Download of '{}' failed: {}", file_name, e);
                shared.set_state(CoordinatorState::Failed);
            }
        }
        drop(guard);
        result
    }
}

/// Drains every pool handle in completion order. Returns the first chunk error, after
/// having stopped all other chunks.
async fn settle_all(
    shared: &Shared,
    handles: Vec<PoolHandle<Result<ChunkOutcome>>>,
) -> Option<DownloadError> {
    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| async move { (index, handle.await) })
        .collect();

    let mut first_error = None;
    while let Some((index, joined)) = pending.next().await {
        let task = &shared.tasks[index];
        let result = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(PoolError::Abandoned)) => {
                task.abandon();
                Ok(ChunkOutcome::Cancelled { index })
            }
            Ok(Err(PoolError::Panicked(reason))) => {
                task.fail(&reason);
                Err(DownloadError::Worker(reason))
            }
            Err(e) => {
                task.fail(&e.to_string());
                Err(DownloadError::Worker(e.to_string()))
            }
        };
        match result {
            Ok(ChunkOutcome::Done { index, size }) => debug!("Chunk #{} settled with {} bytes", index, size),
            Ok(ChunkOutcome::Cancelled { index }) => debug!("Chunk #{} settled as cancelled", index),
            Err(e) => {
                if first_error.is_none() {
                    error!("Chunk #{} failed, cancelling the remaining chunks: {}", index, e);
                    shared.stop_all();
                    first_error = Some(e);
                } else {
                    debug!("Chunk #{} also failed: {}", index, e);
                }
            }
        }
    }
    first_error
}

/// Concatenates the chunk files strictly by range index, then moves the result to
/// `destination`. The destination name only ever holds a complete file.
async fn reassemble(
    tasks: &[Arc<ChunkTask>],
    temp_dir: &TempDirectory,
    file_name: &str,
    destination: &Path,
) -> Result<()> {
    let part = temp_dir.path().join(format!("{}.part", file_name));
    let written = concatenate(tasks, &part).await;
    let result = match written {
        Ok(()) => persist(&part, destination).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&part).await;
    }
    result
}

async fn concatenate(tasks: &[Arc<ChunkTask>], part: &Path) -> Result<()> {
    let mut output = tokio::fs::File::create(part)
        .await
        .map_err(|e| DownloadError::write(part, e))?;
    for task in tasks {
        let mut input = tokio::fs::File::open(task.path())
            .await
            .map_err(|e| DownloadError::write(task.path(), e))?;
        debug!("Writing '{}' into '{}'", task.path().display(), part.display());
        tokio::io::copy(&mut input, &mut output)
            .await
            .map_err(|e| DownloadError::write(part, e))?;
        drop(input);
        // Each chunk file is consumed as soon as it has been copied.
        if let Err(e) = tokio::fs::remove_file(task.path()).await {
            debug!("Could not remove consumed chunk {}: {}", task.path().display(), e);
        }
    }
    output.flush().await.map_err(|e| DownloadError::write(part, e))?;
    output.sync_all().await.map_err(|e| DownloadError::write(part, e))?;
    Ok(())
}

async fn persist(part: &Path, destination: &Path) -> Result<()> {
    if tokio::fs::rename(part, destination).await.is_ok() {
        return Ok(());
    }
    // Scratch space on another filesystem than the destination.
    tokio::fs::copy(part, destination)
        .await
        .map_err(|e| DownloadError::write(destination, e))?;
    let _ = tokio::fs::remove_file(part).await;
    Ok(())
}

fn parent_or_current(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
