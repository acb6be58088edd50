// src/models.rs

use serde::{Deserialize, Serialize};

/// A contiguous, inclusive byte interval of the remote file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Range {
    pub index: usize,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
}

impl Range {
    /// Number of bytes covered by this range.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// The lifecycle of a single chunk task. States only move forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Running,
    Done,
    Cancelled,
    Failed(String),
}

impl ChunkState {
    /// Whether the task reached a terminal state.
    pub fn is_settled(&self) -> bool {
        matches!(self, ChunkState::Done | ChunkState::Cancelled | ChunkState::Failed(_))
    }

    fn rank(&self) -> u8 {
        match self {
            ChunkState::Pending => 0,
            ChunkState::Running => 1,
            _ => 2,
        }
    }

    /// A transition is allowed only towards a later state, and never out of a terminal one.
    pub(crate) fn can_move_to(&self, next: &ChunkState) -> bool {
        !self.is_settled() && next.rank() > self.rank()
    }
}

/// Cumulative transfer progress of one download.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub bytes_received: u64,
    pub bytes_total: u64,
}

impl Progress {
    pub fn new(bytes_received: u64, bytes_total: u64) -> Self {
        Self { bytes_received, bytes_total }
    }

    /// Whole percentage, rounded down.
    pub fn percentage(&self) -> u8 {
        if self.bytes_total == 0 {
            return 0;
        }
        (self.bytes_received.saturating_mul(100) / self.bytes_total).min(100) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received >= self.bytes_total
    }
}

/// What the transport knows about a remote object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_size_is_inclusive() {
        let range = Range { index: 3, start: 900_000, end: 999_999 };
        assert_eq!(range.size(), 100_000);
        let single = Range { index: 0, start: 7, end: 7 };
        assert_eq!(single.size(), 1);
    }

    #[test]
    fn percentage_rounds_down() {
        assert_eq!(Progress::new(0, 1_000).percentage(), 0);
        assert_eq!(Progress::new(999, 1_000).percentage(), 99);
        assert_eq!(Progress::new(1_000, 1_000).percentage(), 100);
        assert_eq!(Progress::new(1, 3).percentage(), 33);
    }

    #[test]
    fn chunk_state_only_moves_forward() {
        assert!(ChunkState::Pending.can_move_to(&ChunkState::Running));
        assert!(ChunkState::Pending.can_move_to(&ChunkState::Cancelled));
        assert!(ChunkState::Running.can_move_to(&ChunkState::Done));
        assert!(!ChunkState::Running.can_move_to(&ChunkState::Pending));
        assert!(!ChunkState::Done.can_move_to(&ChunkState::Cancelled));
        assert!(!ChunkState::Cancelled.can_move_to(&ChunkState::Failed("x".into())));
    }
}
