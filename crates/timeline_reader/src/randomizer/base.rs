//! src/randomizer/base.rs
//!
//! The randomizer base: epoch lifecycle, window consumption, the one-slot
//! prefetch handoff and checkpointing. Ordering decisions are delegated to
//! the configured [`TimelineStrategy`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cleaner::SequenceCleaner;
use crate::config::{EpochConfig, Randomization, ReaderConfig};
use crate::deserializer::{
    ChunkHandle, ChunkId, ChunkInfo, Deserializer, SequenceData, SequenceInfo, StreamDescription,
};
use crate::error::{ReaderError, Result};
use crate::minibatch::MiniBatch;
use crate::window::SequenceWindow;

use super::prefetch::PrefetchSlot;
use super::{state_value, BlockShuffleStrategy, InOrderStrategy, ReaderState, TimelineStrategy};

// Properties used in the checkpoint.
const BASE_SWEEP_INDEX: &str = "base_sweepIndex";
const BASE_SAMPLES_SEEN: &str = "base_numberOfSamplesSeenSoFar";
const BASE_SEQUENCE_POSITION: &str = "base_currentSequencePositionInWindow";

/// Streams mini-batches of sequences out of a [`Deserializer`], in original
/// or block-shuffled order, sharded across workers, with exact
/// checkpoint/restore.
///
/// The consumer drives it from a single thread: `start_epoch` once, then
/// `get_next_sequences` until a batch reports `end_of_epoch`. Between calls
/// a background task prefetches the next window, so deserialization
/// overlaps with consumption.
///
/// # Example
/// ```ignore
/// let mut randomizer = Randomizer::new(deserializer, ReaderConfig::default())?;
/// randomizer.start_epoch(&EpochConfig::default())?;
/// loop {
///     let batch = randomizer.get_next_sequences(1024)?;
///     feed(&batch);
///     if batch.end_of_epoch {
///         break;
///     }
/// }
/// ```
pub struct Randomizer {
    streams: Vec<StreamDescription>,
    strategy: Box<dyn TimelineStrategy>,
    cleaner: SequenceCleaner,
    parallel_fetch: bool,
    prefetch_drain_timeout: Duration,
    /// Normalized epoch configuration; `None` until `start_epoch`.
    epoch: Option<EpochConfig>,
    /// Sweeps completed by this worker in the current epoch.
    sweep_index: usize,
    /// Samples accounted to this worker in the current epoch.
    samples_seen: usize,
    window: SequenceWindow,
    /// Strategy state snapshotted when the active window was produced;
    /// this is what a checkpoint must carry so that a restore can rebuild
    /// the very same window.
    current_state: ReaderState,
    prefetch: Option<PrefetchSlot>,
}

impl std::fmt::Debug for Randomizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Randomizer")
            .field("streams", &self.streams)
            .field("cleaner", &self.cleaner)
            .field("parallel_fetch", &self.parallel_fetch)
            .field("prefetch_drain_timeout", &self.prefetch_drain_timeout)
            .field("epoch", &self.epoch)
            .field("sweep_index", &self.sweep_index)
            .field("samples_seen", &self.samples_seen)
            .field("window", &self.window)
            .field("current_state", &self.current_state)
            .finish()
    }
}

impl Randomizer {
    pub fn new(deserializer: Arc<dyn Deserializer>, config: ReaderConfig) -> Result<Self> {
        let chunks: Arc<[ChunkInfo]> = deserializer.chunk_infos().into();
        if chunks.is_empty() {
            return Err(ReaderError::config(
                "the deserializer does not have any data, the number of chunks is 0",
            ));
        }
        let streams = deserializer.stream_descriptions();

        let strategy: Box<dyn TimelineStrategy> = match &config.randomization {
            Randomization::InOrder => Box::new(InOrderStrategy::new(deserializer, chunks)),
            Randomization::Block {
                window,
                seed_offset,
            } => {
                if window.extent() == 0 {
                    return Err(ReaderError::config("randomization window must be positive"));
                }
                Box::new(BlockShuffleStrategy::new(
                    deserializer,
                    chunks,
                    *window,
                    *seed_offset,
                ))
            }
        };

        Ok(Self {
            streams,
            strategy,
            cleaner: SequenceCleaner::new(config.max_invalid_sequences),
            parallel_fetch: config.parallel_fetch,
            prefetch_drain_timeout: config.prefetch_drain_timeout,
            epoch: None,
            sweep_index: 0,
            samples_seen: 0,
            window: SequenceWindow::default(),
            current_state: ReaderState::new(),
            prefetch: None,
        })
    }

    /// Stream metadata, passed through from the deserializer.
    pub fn stream_descriptions(&self) -> &[StreamDescription] {
        &self.streams
    }

    /// Begins the epoch and fills the first window. Must be called before
    /// any other operation.
    pub fn start_epoch(&mut self, config: &EpochConfig) -> Result<()> {
        config.validate()?;
        let normalized = config.normalized();
        debug!(
            worker_rank = normalized.worker_rank,
            num_workers = normalized.num_workers,
            sweeps = ?normalized.epoch_size_in_sweeps,
            samples = ?normalized.epoch_size_in_samples,
            "starting epoch"
        );
        self.strategy.start_epoch(&normalized)?;
        self.epoch = Some(normalized);
        self.refill()
    }

    /// Returns up to `max_samples` samples' worth of sequences.
    ///
    /// The first sequence is always included even when it alone exceeds
    /// `max_samples`, so a batch is never empty while epoch data remains.
    pub fn get_next_sequences(&mut self, max_samples: usize) -> Result<MiniBatch> {
        if max_samples == 0 {
            return Err(ReaderError::logic("sample count must not be zero"));
        }
        if max_samples > i32::MAX as usize {
            return Err(ReaderError::runtime(
                "the size of a minibatch cannot exceed max int",
            ));
        }
        if self.epoch.is_none() {
            return Err(ReaderError::logic(
                "start_epoch must be called before get_next_sequences",
            ));
        }

        let mut batch = MiniBatch::empty(self.streams.len());
        if self.end_reached() {
            batch.end_of_epoch = true;
            // No further prefetch once the end is reached; wait the
            // outstanding one out instead of abandoning it mid-flight.
            self.drain_prefetch();
            return Ok(batch);
        }

        let (sequences, chunk_map) = self.collect_descriptions(max_samples, &mut batch)?;

        if self.end_reached() {
            self.drain_prefetch();
        }

        if sequences.is_empty() {
            return Ok(batch);
        }

        self.materialize(&sequences, &chunk_map, &mut batch)?;
        batch.chunks = chunk_map.into_values().collect();
        self.cleaner.clean(&mut batch)?;
        Ok(batch)
    }

    /// Snapshot of the stream position. Restoring it on a fresh randomizer
    /// over the same deserializer and configuration resumes the stream
    /// bit-identically.
    pub fn get_state(&self) -> ReaderState {
        let mut state = self.current_state.clone();
        state.insert(BASE_SWEEP_INDEX.to_string(), self.sweep_index as u64);
        state.insert(BASE_SAMPLES_SEEN.to_string(), self.samples_seen as u64);
        state.insert(
            BASE_SEQUENCE_POSITION.to_string(),
            self.window.sequence_position as u64,
        );
        state
    }

    /// Restores a snapshot taken by [`Randomizer::get_state`]. Requires a
    /// preceding `start_epoch` with the same configuration as the run the
    /// snapshot was taken from.
    pub fn set_state(&mut self, state: &ReaderState) -> Result<()> {
        if self.epoch.is_none() {
            return Err(ReaderError::logic(
                "start_epoch must be called before set_state",
            ));
        }

        self.sweep_index = state_value(state, BASE_SWEEP_INDEX)? as usize;
        self.samples_seen = state_value(state, BASE_SAMPLES_SEEN)? as usize;
        let position = state_value(state, BASE_SEQUENCE_POSITION)? as usize;

        // An outstanding prefetch was issued from the pre-restore cursors;
        // wait it out so it cannot be confused with the rebuilt window.
        if let Some(slot) = self.prefetch.take() {
            let _ = slot.into_result();
        }

        self.strategy.restore_inner_state(state)?;
        self.refill()?;

        if position > self.window.sequences.len() {
            return Err(ReaderError::runtime(format!(
                "restored window position {position} is outside the rebuilt window of {} sequences",
                self.window.sequences.len()
            )));
        }
        self.window.sequence_position = position;
        Ok(())
    }

    fn end_reached(&self) -> bool {
        match &self.epoch {
            Some(epoch) => {
                epoch
                    .epoch_size_in_sweeps
                    .is_some_and(|limit| self.sweep_index >= limit)
                    || epoch
                        .epoch_size_in_samples
                        .is_some_and(|limit| self.samples_seen >= limit)
            }
            None => false,
        }
    }

    /// Swaps the prefetched window in and schedules the next prefetch.
    ///
    /// The strategy state is snapshotted first: it is the state that
    /// produced the data about to be consumed, which is what a checkpoint
    /// taken while draining this window must record.
    fn refill(&mut self) -> Result<()> {
        self.current_state = self.strategy.inner_state();

        let slot = match self.prefetch.take() {
            Some(slot) => slot,
            None => PrefetchSlot::spawn(self.strategy.prefetch_job())?,
        };
        let prefetched = slot.into_result()?;
        self.strategy.refill_window(prefetched, &mut self.window)?;
        debug!(
            sequences = self.window.sequences.len(),
            chunks = self.window.chunks.len(),
            "refilled sequence window"
        );

        self.prefetch = Some(PrefetchSlot::spawn(self.strategy.prefetch_job())?);
        Ok(())
    }

    /// Advances the cursor, swapping in the next window past the last
    /// sequence. Windows a worker owns nothing in are skipped; the sweep
    /// marker bounds how many of those can occur in a row.
    fn advance(&mut self) -> Result<()> {
        if self.window.sequence_position + 1 < self.window.sequences.len() {
            self.window.sequence_position += 1;
            return Ok(());
        }
        self.window.sequence_position = 0;
        self.refill()?;
        while self.window.sequences.is_empty() {
            self.refill()?;
        }
        Ok(())
    }

    /// Walks the window collecting sequence descriptors for one mini-batch
    /// and pinning the chunks they live in.
    fn collect_descriptions(
        &mut self,
        max_samples: usize,
        batch: &mut MiniBatch,
    ) -> Result<(Vec<SequenceInfo>, HashMap<ChunkId, ChunkHandle>)> {
        // The strategy should always fill data; report it if it cannot.
        if self.window.sequences.is_empty() {
            return Err(ReaderError::runtime("could not read any data"));
        }

        let mut sequences = Vec::new();
        let mut chunks: HashMap<ChunkId, ChunkHandle> = HashMap::new();
        let mut loaded = 0usize;
        let mut at_least_one_needed = true;

        while loaded < max_samples && !self.end_reached() {
            let sequence = self.window.sequences[self.window.sequence_position];
            if sequence.is_end_of_sweep() {
                self.sweep_index += 1;
                batch.end_of_sweep = true;
                self.advance()?;
                continue;
            }

            let length = sequence.num_samples as usize;
            self.samples_seen += length;

            // Stop before the sequence that would exceed the request.
            if !at_least_one_needed && loaded + length > max_samples {
                break;
            }

            if !chunks.contains_key(&sequence.chunk_id) {
                let handle = self.window.chunks.get(&sequence.chunk_id).ok_or_else(|| {
                    ReaderError::logic(format!(
                        "chunk {} is missing from the window",
                        sequence.chunk_id
                    ))
                })?;
                chunks.insert(sequence.chunk_id, Arc::clone(handle));
            }

            sequences.push(sequence);
            loaded += length;
            at_least_one_needed = false;
            self.advance()?;
        }

        batch.end_of_epoch = self.end_reached();
        Ok((sequences, chunks))
    }

    /// Fetches the payloads of the collected sequences and arranges them by
    /// stream. With `parallel_fetch` the per-sequence fetches run in
    /// parallel; every fetch completes and the first failure is returned.
    fn materialize(
        &self,
        sequences: &[SequenceInfo],
        chunks: &HashMap<ChunkId, ChunkHandle>,
        batch: &mut MiniBatch,
    ) -> Result<()> {
        let num_streams = self.streams.len();
        let fetch = |sequence: &SequenceInfo| -> Result<Vec<SequenceData>> {
            let handle = chunks
                .get(&sequence.chunk_id)
                .ok_or_else(|| ReaderError::logic("invalid chunk requested"))?;
            let mut row = Vec::with_capacity(num_streams);
            handle.get_sequence(sequence.index_in_chunk, &mut row)?;
            if row.len() != num_streams {
                return Err(ReaderError::runtime(format!(
                    "deserializer produced {} streams for a sequence, expected {}",
                    row.len(),
                    num_streams
                )));
            }
            Ok(row)
        };

        let rows: Vec<Result<Vec<SequenceData>>> = if self.parallel_fetch && sequences.len() > 1 {
            sequences.par_iter().map(fetch).collect()
        } else {
            sequences.iter().map(fetch).collect()
        };

        let mut columns = vec![Vec::with_capacity(sequences.len()); num_streams];
        for row in rows {
            for (stream, data) in row?.into_iter().enumerate() {
                columns[stream].push(data);
            }
        }
        batch.data = columns;
        Ok(())
    }

    fn drain_prefetch(&mut self) {
        if let Some(slot) = self.prefetch.as_mut() {
            if !slot.wait_timeout(self.prefetch_drain_timeout) {
                warn!(
                    timeout = ?self.prefetch_drain_timeout,
                    "outstanding prefetch did not finish within the drain timeout"
                );
            }
        }
    }
}
