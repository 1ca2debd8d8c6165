//! src/config.rs
//!
//! Configuration for the randomizer.
//!
//! [`ReaderConfig`] fixes construction-time behaviour (randomization mode,
//! invalid-sequence budget, parallel materialization, prefetch drain).
//! [`EpochConfig`] is passed to `start_epoch` and describes this worker's
//! identity and the epoch extent.
//!
//! Example:
//! ```ignore
//! let config = ReaderConfig::builder()
//!     .block(RandomizationWindow::Chunks(32), 7)
//!     .max_invalid_sequences(16)
//!     .parallel_fetch(true)
//!     .build();
//! ```

use std::time::Duration;

use crate::error::{ReaderError, Result};

/// Extent of the tumbling randomization window, counted in chunks or in
/// samples. Must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomizationWindow {
    Chunks(usize),
    Samples(usize),
}

impl RandomizationWindow {
    pub(crate) fn extent(&self) -> usize {
        match self {
            Self::Chunks(n) | Self::Samples(n) => *n,
        }
    }
}

/// Ordering applied to the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Randomization {
    /// Original timeline order with worker-stride decimation.
    InOrder,
    /// Chunk shuffle per sweep plus sequence shuffle within a tumbling
    /// window. `seed_offset` shifts every seed so readers over the same
    /// data can draw distinct orders.
    Block {
        window: RandomizationWindow,
        seed_offset: u64,
    },
}

/// Construction-time options for [`crate::Randomizer`].
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub randomization: Randomization,
    /// Per-worker budget of sequences the cleaner may drop before failing.
    pub max_invalid_sequences: usize,
    /// Materialize sequence payloads in parallel within a mini-batch.
    pub parallel_fetch: bool,
    /// Upper bound on waiting out an outstanding prefetch at end of epoch.
    /// Defends against shutdown races with deserializers whose lifetime is
    /// not deterministic.
    pub prefetch_drain_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            randomization: Randomization::InOrder,
            max_invalid_sequences: 0,
            parallel_fetch: false,
            prefetch_drain_timeout: Duration::from_secs(60),
        }
    }
}

impl ReaderConfig {
    pub fn builder() -> ReaderConfigBuilder {
        ReaderConfigBuilder::default()
    }
}

/// Builder for [`ReaderConfig`] with method chaining.
#[derive(Default)]
pub struct ReaderConfigBuilder {
    config: ReaderConfig,
}

impl ReaderConfigBuilder {
    /// Keep the original timeline order (the default).
    pub fn in_order(mut self) -> Self {
        self.config.randomization = Randomization::InOrder;
        self
    }

    /// Shuffle chunks per sweep and sequences within the given window.
    pub fn block(mut self, window: RandomizationWindow, seed_offset: u64) -> Self {
        self.config.randomization = Randomization::Block {
            window,
            seed_offset,
        };
        self
    }

    pub fn max_invalid_sequences(mut self, budget: usize) -> Self {
        self.config.max_invalid_sequences = budget;
        self
    }

    /// Fetch sequence payloads of a mini-batch in parallel.
    pub fn parallel_fetch(mut self, parallel: bool) -> Self {
        self.config.parallel_fetch = parallel;
        self
    }

    pub fn prefetch_drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.prefetch_drain_timeout = timeout;
        self
    }

    pub fn build(self) -> ReaderConfig {
        self.config
    }
}

/// Per-epoch configuration passed to `start_epoch`.
///
/// Exactly one of the two epoch sizes is normally set; leaving both unset
/// means one sweep. An unset sweep count with a sample count gives an
/// epoch bounded by samples, where the global sample count is converted to
/// a per-worker target at `start_epoch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochConfig {
    /// Index of the epoch. Only 0 is supported; per-epoch state lives in
    /// checkpoints instead.
    pub epoch_index: usize,
    /// This worker's rank within the data-parallel job.
    pub worker_rank: usize,
    /// Total number of workers. Must be positive.
    pub num_workers: usize,
    /// Epoch extent in full sweeps; `None` means unbounded.
    pub epoch_size_in_sweeps: Option<usize>,
    /// Epoch extent in samples (global before normalization); `None` means
    /// the whole data.
    pub epoch_size_in_samples: Option<usize>,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            epoch_index: 0,
            worker_rank: 0,
            num_workers: 1,
            epoch_size_in_sweeps: None,
            epoch_size_in_samples: None,
        }
    }
}

impl EpochConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.epoch_index != 0 {
            return Err(ReaderError::config(
                "epochs other than 0 are not supported, position the reader with set_state instead",
            ));
        }
        if self.num_workers == 0 {
            return Err(ReaderError::config("number of workers must be > 0"));
        }
        if self.worker_rank >= self.num_workers {
            return Err(ReaderError::config(format!(
                "invalid worker rank {}, expected a value below {}",
                self.worker_rank, self.num_workers
            )));
        }
        Ok(())
    }

    /// Resolves the epoch extent: no extent at all means a single sweep,
    /// and a pure sample extent is converted from global samples to this
    /// worker's share.
    pub(crate) fn normalized(&self) -> EpochConfig {
        let mut config = self.clone();
        match (config.epoch_size_in_sweeps, config.epoch_size_in_samples) {
            (None, None) => config.epoch_size_in_sweeps = Some(1),
            (None, Some(total)) => {
                let extra = usize::from(total % config.num_workers > config.worker_rank);
                config.epoch_size_in_samples = Some(total / config.num_workers + extra);
            }
            _ => {}
        }
        config
    }
}
