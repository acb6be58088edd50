use std::io::Write;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::channel::ConflatedChannel;
use crate::models::Progress;

/// Formats a byte count with base-1024 units, one decimal: `512.0B`, `1.5MB`.
pub fn to_human_readable(value: f64) -> String {
    let mut value = value;
    for unit in ["", "K", "M", "G", "T"] {
        if value.abs() < 1024.0 {
            return format!("{:3.1}{}B", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:3.1}PB", value)
}

/// `HH:MM:SS`, hours not wrapped at a day.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Builds status lines. Throughput is the instantaneous rate since the previous
/// line, so the ETA follows it closely and is noisy on bursty transfers.
#[derive(Debug)]
pub struct StatusLine {
    operation: String,
    started: Instant,
    last: (Instant, u64),
}

impl StatusLine {
    pub fn new(operation: impl Into<String>, started: Instant) -> Self {
        Self { operation: operation.into(), started, last: (started, 0) }
    }

    pub fn initial(&self) -> String {
        format!("{} 0%", self.operation)
    }

    pub fn render(&mut self, progress: &Progress, now: Instant) -> String {
        let (last_at, last_bytes) = self.last;
        let window = now.saturating_duration_since(last_at).as_secs_f64();
        let delta = progress.bytes_received.saturating_sub(last_bytes) as f64;
        let speed = if window > 0.0 { delta / window } else { 0.0 };
        self.last = (now, progress.bytes_received);

        let remaining = progress.bytes_total.saturating_sub(progress.bytes_received) as f64;
        let eta = if remaining == 0.0 {
            format_hms(Duration::ZERO)
        } else if speed > 0.0 {
            format_hms(Duration::from_secs_f64(remaining / speed))
        } else {
            "--:--:--".to_string()
        };

        format!(
            "{} {}% - {}/{} - {}/s - {} - ETA: {}             ",
            self.operation,
            progress.percentage(),
            to_human_readable(progress.bytes_received as f64),
            to_human_readable(progress.bytes_total as f64),
            to_human_readable(speed),
            format_hms(now.saturating_duration_since(self.started)),
            eta
        )
    }
}

/// Background consumer printing at most one status line per interval.
///
/// It takes whatever value is newest, never a backlog, so a slow terminal cannot hold
/// back the transfer. The loop ends once the channel is closed and empty; a value sent
/// just before closing may or may not be printed.
#[derive(Debug)]
pub struct ProgressReporter {
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn<W>(
        operation: impl Into<String>,
        channel: ConflatedChannel<Progress>,
        interval: Duration,
        out: W,
    ) -> Self
    where
        W: Write + Send + 'static,
    {
        let mut line = StatusLine::new(operation, Instant::now());
        let handle = tokio::spawn(async move {
            let Some(mut out) = write_line(out, line.initial()).await else {
                return;
            };
            loop {
                if let Some(progress) = channel.try_recv() {
                    let text = line.render(&progress, Instant::now());
                    out = match write_line(out, text).await {
                        Some(out) => out,
                        None => break,
                    };
                } else if channel.is_finished() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = channel.closed() => {}
                }
            }
            debug!("Progress reporter finished");
        });
        Self { handle }
    }

    /// Waits for the loop to end. Close the channel first.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            debug!("Progress reporter task ended abnormally: {}", e);
        }
    }
}

/// Writes on a blocking thread so a slow terminal never stalls the runtime. Hands the
/// writer back, or `None` if the blocking task panicked.
async fn write_line<W>(mut out: W, text: String) -> Option<W>
where
    W: Write + Send + 'static,
{
    let written = tokio::task::spawn_blocking(move || {
        if let Err(e) = write!(out, "{}\r", text).and_then(|_| out.flush()) {
            debug!("Could not print progress: {}", e);
        }
        out
    })
    .await;
    match written {
        Ok(out) => Some(out),
        Err(e) => {
            debug!("Progress writer failed: {}", e);
            None
        }
    }
}
