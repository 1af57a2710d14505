use crate::core::model::ChunkRange;
use std::collections::VecDeque;

/// Upper bound on precomputed pending chunks.
pub const MAX_PREFETCH: usize = 8;

/// Carves up to `limit` ranges from `offset` towards `total`.
pub fn plan_ranges(offset: u64, total: u64, chunk_size: u64, limit: usize) -> Vec<ChunkRange> {
    debug_assert!(chunk_size > 0);
    let mut ranges = Vec::new();
    let mut start = offset;
    while ranges.len() < limit && start < total {
        let end = start.saturating_add(chunk_size).min(total);
        ranges.push(ChunkRange::spanning(start, end));
        start = end;
    }
    ranges
}

/// Bounded lookahead queue of byte ranges still to be sent.
///
/// Only ranges are precomputed; no bytes are read here.
#[derive(Debug)]
pub struct ChunkScheduler {
    file_size: u64,
    chunk_size: u64,
    bytes_enqueued: u64,
    pending: VecDeque<ChunkRange>,
}

impl ChunkScheduler {
    /// `offset` is the server-confirmed starting point; `chunk_size` must be positive.
    pub fn new(file_size: u64, chunk_size: u64, offset: u64) -> Self {
        Self {
            file_size,
            chunk_size: chunk_size.max(1),
            bytes_enqueued: offset.min(file_size),
            pending: VecDeque::with_capacity(MAX_PREFETCH),
        }
    }

    /// Tops the queue up to `MAX_PREFETCH` entries. Returns how many were added.
    pub fn refill(&mut self) -> usize {
        let room = MAX_PREFETCH.saturating_sub(self.pending.len());
        let ranges = plan_ranges(self.bytes_enqueued, self.file_size, self.chunk_size, room);
        let added = ranges.len();
        if let Some(last) = ranges.last() {
            self.bytes_enqueued = last.end();
        }
        self.pending.extend(ranges);
        added
    }

    pub fn next_chunk(&mut self) -> Option<ChunkRange> {
        self.pending.pop_front()
    }

    pub fn bytes_enqueued(&self) -> u64 {
        self.bytes_enqueued
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
