//! Chunk shuffle per sweep plus sequence shuffle within a tumbling window.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{EpochConfig, RandomizationWindow};
use crate::deserializer::{ChunkInfo, Deserializer, SequenceInfo};
use crate::error::{ReaderError, Result};
use crate::window::SequenceWindow;

use super::{state_value, PrefetchJob, PrefetchedWindow, ReaderState, TimelineStrategy};

// Properties used in the checkpoint.
const CHUNK_POSITION: &str = "chunkPosition";
const SWEEP_INDEX: &str = "sweepIndex";

/// Shuffled ordering over the timeline.
///
/// Each sweep draws a fresh chunk permutation seeded with
/// `sweep_index + seed_offset`. A window covers `randomization_range` worth
/// of this worker's chunks (counted in chunks or samples); the sequences
/// inside a window are shuffled with a seed derived from the window's start
/// position, so every ordering is reproducible from the two checkpointed
/// cursors alone. Sweep markers act as shuffle barriers: sequences never
/// move across them.
///
/// Sharding is at chunk granularity: the worker at rank `r` owns the chunks
/// at shuffled positions congruent to `r` modulo `num_workers`. Positions
/// owned by other workers are walked over without fetching data.
pub struct BlockShuffleStrategy {
    deserializer: Arc<dyn Deserializer>,
    chunks: Arc<[ChunkInfo]>,
    range: RandomizationWindow,
    seed_offset: u64,
    config: EpochConfig,
    /// Position in the shuffled chunk list of the next window's start.
    chunk_position: usize,
    /// Sweep whose permutation `chunk_position` indexes into.
    sweep_index: usize,
}

impl BlockShuffleStrategy {
    pub fn new(
        deserializer: Arc<dyn Deserializer>,
        chunks: Arc<[ChunkInfo]>,
        range: RandomizationWindow,
        seed_offset: u64,
    ) -> Self {
        Self {
            deserializer,
            chunks,
            range,
            seed_offset,
            config: EpochConfig::default(),
            chunk_position: 0,
            sweep_index: 0,
        }
    }
}

/// The chunk permutation of one sweep.
fn shuffled_chunk_order(chunks: &[ChunkInfo], sweep_index: usize, seed_offset: u64) -> Vec<ChunkInfo> {
    let mut shuffled = chunks.to_vec();
    let mut rng = StdRng::seed_from_u64((sweep_index as u64).wrapping_add(seed_offset));
    shuffled.shuffle(&mut rng);
    shuffled
}

impl TimelineStrategy for BlockShuffleStrategy {
    fn start_epoch(&mut self, config: &EpochConfig) -> Result<()> {
        // A rank beyond the chunk count would own no shuffled position at
        // all and the prefetch walk could never fill its window.
        if config.worker_rank >= self.chunks.len() {
            return Err(ReaderError::config(format!(
                "worker rank {} cannot be served by {} chunks, chunk-level sharding needs at \
                 least one chunk per worker",
                config.worker_rank,
                self.chunks.len()
            )));
        }
        self.config = config.clone();
        Ok(())
    }

    fn inner_state(&self) -> ReaderState {
        let mut state = ReaderState::new();
        state.insert(CHUNK_POSITION.to_string(), self.chunk_position as u64);
        state.insert(SWEEP_INDEX.to_string(), self.sweep_index as u64);
        state
    }

    fn restore_inner_state(&mut self, state: &ReaderState) -> Result<()> {
        // The permutation and the RNG are not part of the checkpoint; the
        // next prefetch regenerates both from these two cursors.
        self.chunk_position = state_value(state, CHUNK_POSITION)? as usize;
        self.sweep_index = state_value(state, SWEEP_INDEX)? as usize;
        Ok(())
    }

    fn prefetch_job(&self) -> PrefetchJob {
        let deserializer = Arc::clone(&self.deserializer);
        let chunks = Arc::clone(&self.chunks);
        let config = self.config.clone();
        let seed_offset = self.seed_offset;
        let sample_based = matches!(self.range, RandomizationWindow::Samples(_));
        let full_range = self.range.extent() as i64;
        let original_chunk_position = self.chunk_position;
        let original_sweep_index = self.sweep_index;

        Box::new(move || {
            let num_chunks = chunks.len();
            let mut shuffled = shuffled_chunk_order(&chunks, original_sweep_index, seed_offset);
            let mut range = full_range;
            let mut position = original_chunk_position;
            let mut sweep_index = original_sweep_index;
            let mut sequences: Vec<SequenceInfo> = Vec::new();
            let mut prefetched_chunks = Vec::new();

            while range > 0 {
                let descriptor = shuffled[position].clone();
                if position % config.num_workers == config.worker_rank {
                    let appended_from = sequences.len();
                    let handle = deserializer.get_chunk(descriptor.id)?;
                    handle.sequence_infos(&mut sequences);
                    prefetched_chunks.push((descriptor, Some(handle)));

                    if sample_based {
                        for sequence in &sequences[appended_from..] {
                            range -= sequence.num_samples as i64;
                        }
                    } else {
                        range -= 1;
                    }
                } else {
                    // Not ours; recorded anyway so the cursor advances past
                    // it during refill.
                    prefetched_chunks.push((ChunkInfo::default(), None));
                }

                if position == num_chunks - 1 {
                    sweep_index += 1;
                    shuffled = shuffled_chunk_order(&chunks, sweep_index, seed_offset);
                    sequences.push(SequenceInfo::END_OF_SWEEP);
                }
                position = (position + 1) % num_chunks;
            }

            if sweep_index == original_sweep_index {
                // Window stayed within one sweep.
                let seed = (original_chunk_position as u64)
                    .wrapping_add(sweep_index as u64)
                    .wrapping_add(seed_offset);
                sequences.shuffle(&mut StdRng::seed_from_u64(seed));
            } else {
                // The window crossed sweep boundaries; shuffle each run
                // between markers on its own, leaving the markers in place.
                let mut runs = Vec::new();
                let mut run_start = 0;
                for i in 0..sequences.len() {
                    if sequences[i].is_end_of_sweep() {
                        runs.push((run_start, i));
                        run_start = i + 1;
                    }
                }
                runs.push((run_start, sequences.len()));

                let mut position_in_sweep = original_chunk_position;
                for (run_index, &(start, end)) in runs.iter().enumerate() {
                    let seed = (position_in_sweep as u64)
                        .wrapping_add(original_sweep_index as u64)
                        .wrapping_add(run_index as u64)
                        .wrapping_add(seed_offset);
                    // Later runs start at the beginning of their sweep.
                    position_in_sweep = 0;
                    sequences[start..end].shuffle(&mut StdRng::seed_from_u64(seed));
                }
            }

            Ok(PrefetchedWindow {
                sequences,
                chunks: prefetched_chunks,
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
        for sequence in &window.sequences {
            if sequence.is_end_of_sweep() {
                self.sweep_index += 1;
            }
        }
        for (descriptor, handle) in prefetched.chunks {
            if let Some(handle) = handle {
                window.chunks.insert(descriptor.id, handle);
            }
            self.chunk_position = (self.chunk_position + 1) % self.chunks.len();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deserializer::{InMemoryDeserializer, InMemorySequence};

    fn strategy_over(
        chunk_sample_counts: &[&[u32]],
        window: RandomizationWindow,
        seed_offset: u64,
    ) -> BlockShuffleStrategy {
        let mut deserializer = InMemoryDeserializer::new(&["tokens"]);
        for &sizes in chunk_sample_counts {
            let sequences = sizes
                .iter()
                .map(|&n| InMemorySequence::new(n, vec![vec![n as u8]]))
                .collect();
            deserializer.push_chunk(sequences);
        }
        let deserializer = Arc::new(deserializer);
        let chunks: Arc<[ChunkInfo]> = deserializer.chunk_infos().into();
        BlockShuffleStrategy::new(deserializer, chunks, window, seed_offset)
    }

    #[test]
    fn chunk_order_is_reproducible_per_sweep() {
        let chunks: Vec<ChunkInfo> = (0..8)
            .map(|id| ChunkInfo {
                id,
                number_of_samples: 1,
                number_of_sequences: 1,
            })
            .collect();

        let sweep0_a = shuffled_chunk_order(&chunks, 0, 7);
        let sweep0_b = shuffled_chunk_order(&chunks, 0, 7);
        assert_eq!(sweep0_a, sweep0_b);

        let sweep1 = shuffled_chunk_order(&chunks, 1, 7);
        assert_ne!(sweep0_a, sweep1);
    }

    #[test]
    fn chunk_window_covers_exactly_the_requested_chunks() {
        let strategy = strategy_over(
            &[&[1, 1], &[1, 1], &[1, 1], &[1, 1], &[1, 1]],
            RandomizationWindow::Chunks(2),
            7,
        );
        let prefetched = (strategy.prefetch_job())().unwrap();

        let owned = prefetched
            .chunks
            .iter()
            .filter(|(_, handle)| handle.is_some())
            .count();
        assert_eq!(owned, 2);
        assert_eq!(prefetched.chunks.len(), 2); // single worker owns every position
        assert_eq!(
            prefetched
                .sequences
                .iter()
                .filter(|s| !s.is_end_of_sweep())
                .count(),
            4
        );
    }

    #[test]
    fn sample_window_stops_after_covering_the_target() {
        // Chunks of 3, 2, 4, 1 and 2 samples; a 5-sample window must stop
        // as soon as at least 5 samples' worth of sequences are covered.
        let strategy = strategy_over(
            &[&[3], &[2], &[4], &[1], &[2]],
            RandomizationWindow::Samples(5),
            7,
        );
        let prefetched = (strategy.prefetch_job())().unwrap();

        let covered: u64 = prefetched
            .sequences
            .iter()
            .filter(|s| !s.is_end_of_sweep())
            .map(|s| s.num_samples as u64)
            .sum();
        assert!(covered >= 5, "window covered only {covered} samples");

        // Dropping the last fetched chunk falls below the target, i.e. the
        // walk did not overshoot.
        let last_chunk_samples = prefetched
            .chunks
            .iter()
            .rev()
            .find_map(|(descriptor, handle)| {
                handle.as_ref().map(|_| descriptor.number_of_samples as u64)
            })
            .unwrap();
        assert!(covered - last_chunk_samples < 5);
    }

    #[test]
    fn prefetch_leaves_durable_state_alone() {
        let mut strategy = strategy_over(
            &[&[1], &[1], &[1]],
            RandomizationWindow::Chunks(2),
            0,
        );
        strategy.start_epoch(&EpochConfig::default()).unwrap();

        let before = strategy.inner_state();
        let prefetched = (strategy.prefetch_job())().unwrap();
        assert_eq!(strategy.inner_state(), before);

        let mut window = SequenceWindow::default();
        strategy.refill_window(prefetched, &mut window).unwrap();
        assert_eq!(
            state_value(&strategy.inner_state(), CHUNK_POSITION).unwrap(),
            2
        );
    }

    #[test]
    fn windows_are_identical_for_identical_cursors() {
        let strategy_a = strategy_over(
            &[&[1, 1], &[1, 1], &[1, 1], &[1, 1]],
            RandomizationWindow::Chunks(3),
            11,
        );
        let strategy_b = strategy_over(
            &[&[1, 1], &[1, 1], &[1, 1], &[1, 1]],
            RandomizationWindow::Chunks(3),
            11,
        );

        let window_a = (strategy_a.prefetch_job())().unwrap();
        let window_b = (strategy_b.prefetch_job())().unwrap();
        assert_eq!(window_a.sequences, window_b.sequences);
    }

    #[test]
    fn sweep_crossing_window_keeps_markers_in_place() {
        // Window larger than the dataset forces a sweep crossing.
        let strategy = strategy_over(
            &[&[1], &[1], &[1]],
            RandomizationWindow::Chunks(5),
            3,
        );
        let prefetched = (strategy.prefetch_job())().unwrap();

        let marker_positions: Vec<usize> = prefetched
            .sequences
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_end_of_sweep())
            .map(|(i, _)| i)
            .collect();
        // Three owned chunks per sweep, so the first marker sits after the
        // first three sequences.
        assert_eq!(marker_positions[0], 3);
    }

    #[test]
    fn rank_beyond_chunk_count_is_rejected() {
        let mut strategy = strategy_over(&[&[1], &[1]], RandomizationWindow::Chunks(1), 0);
        let result = strategy.start_epoch(&EpochConfig {
            worker_rank: 2,
            num_workers: 4,
            ..Default::default()
        });
        assert!(matches!(result, Err(ReaderError::Config { .. })));
    }
}
