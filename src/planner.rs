// src/planner.rs

use crate::error::{DownloadError, Result};
use crate::models::Range;

/// Number of chunks needed to cover `file_size` bytes, `ceil(file_size / chunk_size)`.
pub fn number_of_chunks(file_size: u64, chunk_size: u64) -> Result<usize> {
    validate(file_size, chunk_size)?;
    Ok(file_size.div_ceil(chunk_size) as usize)
}

/// Splits `[0, file_size)` into contiguous inclusive ranges of at most `chunk_size` bytes,
/// ordered by index.
pub fn plan(file_size: u64, chunk_size: u64) -> Result<Vec<Range>> {
    let count = number_of_chunks(file_size, chunk_size)?;
    let ranges = (0..count)
        .map(|index| {
            let start = index as u64 * chunk_size;
            let end = (file_size - 1).min(start + chunk_size - 1);
            Range { index, start, end }
        })
        .collect();
    Ok(ranges)
}

fn validate(file_size: u64, chunk_size: u64) -> Result<()> {
    if file_size == 0 {
        return Err(DownloadError::InvalidInput("file size must be greater than zero".into()));
    }
    if chunk_size == 0 {
        return Err(DownloadError::InvalidInput("chunk size must be greater than zero".into()));
    }
    Ok(())
}
