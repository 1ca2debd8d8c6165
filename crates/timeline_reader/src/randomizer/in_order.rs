//! Identity ordering with worker-stride decimation.

use std::sync::Arc;

use crate::config::EpochConfig;
use crate::deserializer::{ChunkInfo, Deserializer, SequenceInfo};
use crate::error::Result;
use crate::window::SequenceWindow;

use super::{state_value, PrefetchJob, PrefetchedWindow, ReaderState, TimelineStrategy};

// Properties used in the checkpoint.
const CURRENT_CHUNK_POSITION: &str = "currentChunkPosition";
const CURRENT_SEQUENCE_POSITION: &str = "currentSequencePosition";

/// Emits the original timeline unchanged, one chunk per window.
///
/// With several workers the timeline is decimated at sequence granularity:
/// worker `r` of `n` keeps every sequence whose global position is
/// congruent to `r` modulo `n`. Concatenating all workers' output in rank
/// order, interleaved by position, reproduces the original timeline exactly
/// (modulo the sweep markers every worker emits).
pub struct InOrderStrategy {
    deserializer: Arc<dyn Deserializer>,
    chunks: Arc<[ChunkInfo]>,
    config: EpochConfig,
    /// Next chunk to prefetch.
    current_chunk_position: usize,
    /// Global sequence counter driving the decimation; resets per sweep.
    current_sequence_position: usize,
}

impl InOrderStrategy {
    pub fn new(deserializer: Arc<dyn Deserializer>, chunks: Arc<[ChunkInfo]>) -> Self {
        Self {
            deserializer,
            chunks,
            config: EpochConfig::default(),
            current_chunk_position: 0,
            current_sequence_position: 0,
        }
    }
}

impl TimelineStrategy for InOrderStrategy {
    fn start_epoch(&mut self, config: &EpochConfig) -> Result<()> {
        self.config = config.clone();
        Ok(())
    }

    fn inner_state(&self) -> ReaderState {
        let mut state = ReaderState::new();
        state.insert(
            CURRENT_CHUNK_POSITION.to_string(),
            self.current_chunk_position as u64,
        );
        state.insert(
            CURRENT_SEQUENCE_POSITION.to_string(),
            self.current_sequence_position as u64,
        );
        state
    }

    fn restore_inner_state(&mut self, state: &ReaderState) -> Result<()> {
        self.current_chunk_position = state_value(state, CURRENT_CHUNK_POSITION)? as usize;
        self.current_sequence_position = state_value(state, CURRENT_SEQUENCE_POSITION)? as usize;
        Ok(())
    }

    fn prefetch_job(&self) -> PrefetchJob {
        let deserializer = Arc::clone(&self.deserializer);
        let descriptor = self.chunks[self.current_chunk_position].clone();
        Box::new(move || {
            let handle = deserializer.get_chunk(descriptor.id)?;
            let mut sequences = Vec::with_capacity(descriptor.number_of_sequences);
            handle.sequence_infos(&mut sequences);
            Ok(PrefetchedWindow {
                sequences,
                chunks: vec![(descriptor, Some(handle))],
            })
        })
    }

    fn refill_window(
        &mut self,
        prefetched: PrefetchedWindow,
        window: &mut SequenceWindow,
    ) -> Result<()> {
        window.clear();
        window.sequences = prefetched.sequences;
        for (descriptor, handle) in prefetched.chunks {
            if let Some(handle) = handle {
                window.chunks.insert(descriptor.id, handle);
            }
        }

        if self.config.num_workers > 1 {
            // Decimate according to the global position, keeping this
            // worker's stride as a compacted prefix.
            let total = window.sequences.len();
            let mut kept = 0;
            for i in 0..total {
                if (self.current_sequence_position + i) % self.config.num_workers
                    == self.config.worker_rank
                {
                    window.sequences.swap(kept, i);
                    kept += 1;
                }
            }
            self.current_sequence_position += total;
            window.sequences.truncate(kept);
        }

        // If last chunk, add the sweep marker.
        if self.current_chunk_position == self.chunks.len() - 1 {
            window.sequences.push(SequenceInfo::END_OF_SWEEP);
            self.current_sequence_position = 0;
        }

        self.current_chunk_position = (self.current_chunk_position + 1) % self.chunks.len();
        Ok(())
    }
}
