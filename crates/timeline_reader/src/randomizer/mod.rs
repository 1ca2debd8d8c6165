//! Timeline randomization: the base state machine and its strategies.
//!
//! The [`Randomizer`] base owns the epoch lifecycle, the one-slot prefetch
//! pipeline, mini-batch assembly and checkpointing, and delegates window
//! construction to a [`TimelineStrategy`]:
//!
//! - [`InOrderStrategy`] keeps the original timeline and shards it across
//!   workers at sequence granularity;
//! - [`BlockShuffleStrategy`] shuffles chunks per sweep and sequences
//!   within a tumbling window, sharding at chunk granularity.
//!
//! Both strategies derive every shuffle by reseeding from their durable
//! cursor state, so a checkpoint needs to hold only a handful of counters.

mod base;
mod block;
mod in_order;
mod prefetch;

pub use base::Randomizer;
pub use block::BlockShuffleStrategy;
pub use in_order::InOrderStrategy;

use std::collections::BTreeMap;

use crate::config::EpochConfig;
use crate::deserializer::{ChunkHandle, ChunkInfo, SequenceInfo};
use crate::error::{ReaderError, Result};
use crate::window::SequenceWindow;

/// Checkpoint payload: a flat map from key to counter. Ordered so that two
/// identical states serialize identically.
pub type ReaderState = BTreeMap<String, u64>;

/// Contents of the next window, produced ahead of time on the prefetch
/// thread.
///
/// `chunks` lists one record per chunk position the prefetch walked over,
/// in walk order. Positions owned by other workers carry no handle but are
/// still recorded: the strategy advances its cursor by one per record
/// during refill.
pub struct PrefetchedWindow {
    pub sequences: Vec<SequenceInfo>,
    pub chunks: Vec<(ChunkInfo, Option<ChunkHandle>)>,
}

/// Closure that builds the next window. Runs off-thread; captures a
/// snapshot of the strategy's durable state and must not touch the strategy
/// itself.
pub type PrefetchJob = Box<dyn FnOnce() -> Result<PrefetchedWindow> + Send>;

/// The pluggable ordering behind the randomizer base.
///
/// Durable state (the cursors checkpointed via `inner_state`) advances only
/// inside `refill_window`, on the consumer thread. `prefetch_job` snapshots
/// that state into a closure, so an outstanding prefetch is always
/// reproducible from the last checkpoint.
pub trait TimelineStrategy: Send {
    /// Installs the normalized epoch configuration. Called by the base
    /// before the first refill.
    fn start_epoch(&mut self, config: &EpochConfig) -> Result<()>;

    /// Durable cursor state for the checkpoint.
    fn inner_state(&self) -> ReaderState;

    /// Restores the durable cursor state from a checkpoint.
    fn restore_inner_state(&mut self, state: &ReaderState) -> Result<()>;

    /// Builds the job that computes the next window from the current
    /// durable state.
    fn prefetch_job(&self) -> PrefetchJob;

    /// Installs prefetched contents into the window and advances the
    /// durable cursors accordingly.
    fn refill_window(
        &mut self,
        prefetched: PrefetchedWindow,
        window: &mut SequenceWindow,
    ) -> Result<()>;
}

/// Looks up a required checkpoint entry.
pub(crate) fn state_value(state: &ReaderState, key: &str) -> Result<u64> {
    state
        .get(key)
        .copied()
        .ok_or_else(|| ReaderError::runtime(format!("checkpoint is missing the '{key}' entry")))
}
