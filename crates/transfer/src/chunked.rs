use std::ops::Range;

use crate::TransferError;

const MIB: u64 = 1024 * 1024;

/// One contiguous slice of the file, the unit of network transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 0-based position in the plan.
    pub index: usize,
    /// First byte of the chunk (inclusive).
    pub start: u64,
    /// One past the last byte of the chunk (exclusive).
    pub end: u64,
    /// Retries spent on this chunk by its current transfer attempt.
    pub retry_count: u32,
}

impl ChunkDescriptor {
    /// Size of this chunk in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Byte range `[start, end)` covered by this chunk.
    pub fn byte_range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// Number of chunks needed to cover `file_size` bytes.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> Result<usize, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::ZeroChunkSize);
    }
    Ok(file_size.div_ceil(chunk_size) as usize)
}

/// Partitions `[0, file_size)` into ordered chunks of `chunk_size` bytes.
///
/// Every chunk but the last is exactly `chunk_size` long; the last one is
/// in `(0, chunk_size]`. An empty file yields an empty plan.
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Result<Vec<ChunkDescriptor>, TransferError> {
    let count = total_chunks(file_size, chunk_size)?;
    let plan = (0..count)
        .map(|index| {
            let start = index as u64 * chunk_size;
            ChunkDescriptor {
                index,
                start,
                end: (start + chunk_size).min(file_size),
                retry_count: 0,
            }
        })
        .collect();
    Ok(plan)
}

/// Returns `true` when a file of `file_size` bytes is strictly larger than
/// `threshold_mb` MiB and should go through the chunked path.
pub fn needs_chunk_upload(file_size: u64, threshold_mb: u64) -> bool {
    file_size > threshold_mb.saturating_mul(MIB)
}
