//! Paced extraction of trajectory batches from a looping source.
//!
//! The provider walks a fixed source trajectory by following `next_id`
//! links and hands out batches covering a requested amount of robot time.
//! Every served point is remembered so the caller can later ask which ids
//! are old enough to be deleted from the controller again.

use std::collections::VecDeque;
use std::path::Path;

use crate::error::{RailError, Result};
use crate::trajectory::{self, Linkage, ParseOptions, TrajectoryPoint};

/// Serves batches of points and tracks what it has served.
#[derive(Debug, Clone)]
pub struct EpisodeProvider {
    source: Vec<TrajectoryPoint>,
    cursor: usize,
    /// `(id, duration_ms)` of served points, oldest first.
    history: VecDeque<(u32, u64)>,
}

impl EpisodeProvider {
    pub fn new(source: Vec<TrajectoryPoint>) -> Self {
        Self {
            source,
            cursor: 0,
            history: VecDeque::new(),
        }
    }

    /// Load a CSV trajectory whose last point links back to the first.
    pub fn from_file(path: impl AsRef<Path>, last_duration_ms: u64) -> Result<Self> {
        let options = ParseOptions {
            linkage: Linkage::Looping,
            last_duration_ms,
        };
        Ok(Self::new(trajectory::load_file(path, options)?))
    }

    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    /// Index of the next point to serve.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Served points not yet released, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &(u32, u64)> {
        self.history.iter()
    }

    /// Total duration of the served, unreleased points.
    pub fn buffered_ms(&self) -> u64 {
        self.history.iter().map(|&(_, d)| d).sum()
    }

    /// Serve points until at least `duration_ms` of robot time is covered.
    pub fn get_batch(&mut self, duration_ms: u64) -> Result<Vec<TrajectoryPoint>> {
        if self.source.is_empty() {
            return Err(RailError::EmptySource);
        }
        let len = self.source.len();

        let mut batch = Vec::new();
        let mut covered = 0u64;
        let mut idle = 0usize;
        while covered < duration_ms {
            let point = &self.source[self.cursor];
            covered = covered.saturating_add(point.duration_ms);
            self.history.push_back((point.id, point.duration_ms));
            self.cursor = point.next_id as usize % len;
            batch.push(point.clone());

            // A lap of zero-length points never makes progress.
            if point.duration_ms == 0 {
                idle += 1;
                if idle >= len {
                    break;
                }
            } else {
                idle = 0;
            }
        }
        Ok(batch)
    }

    /// Release served points older than the newest `duration_ms` of history.
    ///
    /// Walking back from the newest point, the point at which the summed
    /// duration reaches `duration_ms` and everything before it are removed
    /// and returned, oldest first. Returns nothing when the history is
    /// shorter than `duration_ms`.
    pub fn get_free(&mut self, duration_ms: u64) -> Vec<u32> {
        let mut acc = 0u64;
        let boundary = self.history.iter().rposition(|&(_, d)| {
            acc = acc.saturating_add(d);
            acc >= duration_ms
        });
        match boundary {
            Some(index) => self.history.drain(..=index).map(|(id, _)| id).collect(),
            None => Vec::new(),
        }
    }

    /// Like [`EpisodeProvider::get_free`], compressed into inclusive id runs.
    pub fn get_free_ranges(&mut self, duration_ms: u64) -> Vec<(u32, u32)> {
        compress_ranges(&self.get_free(duration_ms))
    }
}

/// Collapse ids into maximal runs of consecutive values, keeping their order.
pub fn compress_ranges(ids: &[u32]) -> Vec<(u32, u32)> {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &id in ids {
        match ranges.last_mut() {
            Some((_, last)) if last.checked_add(1) == Some(id) => *last = id,
            _ => ranges.push((id, id)),
        }
    }
    ranges
}
