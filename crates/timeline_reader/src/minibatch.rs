//! The mini-batch handed to the consumer.

use crate::deserializer::{ChunkHandle, SequenceData};

/// A batch of sequences arranged as a column-oriented matrix: one row per
/// stream, one column per sequence, in the order the randomizer emitted
/// them.
///
/// While a `MiniBatch` is alive it shares ownership of the chunks its
/// payloads came from, so a batch may safely outlive the window that
/// produced it.
pub struct MiniBatch {
    /// Payloads indexed as `data[stream][sequence]`.
    pub data: Vec<Vec<SequenceData>>,
    /// Chunks referenced by this batch, held to pin their lifetime.
    pub chunks: Vec<ChunkHandle>,
    /// True if a sweep boundary was crossed while assembling this batch.
    pub end_of_sweep: bool,
    /// True if this is the last batch of the epoch.
    pub end_of_epoch: bool,
}

impl std::fmt::Debug for MiniBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiniBatch")
            .field("data", &self.data)
            .field("chunks", &self.chunks.len())
            .field("end_of_sweep", &self.end_of_sweep)
            .field("end_of_epoch", &self.end_of_epoch)
            .finish()
    }
}

impl MiniBatch {
    pub(crate) fn empty(num_streams: usize) -> Self {
        Self {
            data: vec![Vec::new(); num_streams],
            chunks: Vec::new(),
            end_of_sweep: false,
            end_of_epoch: false,
        }
    }

    /// Number of sequences in the batch.
    pub fn num_sequences(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.num_sequences() == 0
    }

    /// The payload column of one stream, if the stream exists.
    pub fn stream(&self, index: usize) -> Option<&[SequenceData]> {
        self.data.get(index).map(Vec::as_slice)
    }
}
