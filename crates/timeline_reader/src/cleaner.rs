//! Removal of sequences that failed materialization.

use tracing::warn;

use crate::error::{ReaderError, Result};
use crate::minibatch::MiniBatch;

/// Drops invalid sequences from mini-batches, bounded by a per-worker
/// budget.
///
/// A sequence is invalid when any of its stream payloads carries
/// `is_valid == false`. Invalid columns are removed in place from every
/// stream; once the total number of dropped sequences exceeds the budget,
/// `clean` fails with a data error. The budget spans the worker's lifetime
/// and is not reset at epoch boundaries.
#[derive(Debug)]
pub struct SequenceCleaner {
    max_invalid: usize,
    dropped_so_far: usize,
}

impl SequenceCleaner {
    pub fn new(max_invalid: usize) -> Self {
        Self {
            max_invalid,
            dropped_so_far: 0,
        }
    }

    /// Number of sequences dropped since construction.
    pub fn dropped_so_far(&self) -> usize {
        self.dropped_so_far
    }

    pub fn clean(&mut self, batch: &mut MiniBatch) -> Result<()> {
        let num_sequences = batch.num_sequences();
        if num_sequences == 0 {
            return Ok(());
        }

        let keep: Vec<bool> = (0..num_sequences)
            .map(|column| batch.data.iter().all(|stream| stream[column].is_valid))
            .collect();
        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return Ok(());
        }

        for stream in &mut batch.data {
            let mut column = 0;
            stream.retain(|_| {
                let kept = keep[column];
                column += 1;
                kept
            });
        }

        self.dropped_so_far += dropped;
        warn!(
            dropped,
            total = self.dropped_so_far,
            "dropped invalid sequences from mini-batch"
        );

        if self.dropped_so_far > self.max_invalid {
            return Err(ReaderError::data(format!(
                "number of invalid sequences ({}) exceeded the allowed maximum ({})",
                self.dropped_so_far, self.max_invalid
            )));
        }
        Ok(())
    }
}
