//! Deterministic timeline randomization for sequence training data.
//!
//! A [`Randomizer`] consumes a pluggable [`Deserializer`] that exposes the
//! raw data as an ordered list of chunks of sequences, and produces a
//! stream of mini-batches: in original order or block-shuffled, sharded
//! across distributed workers, with a one-slot background prefetch and
//! exact checkpoint/restore through a flat counter map.

pub mod cleaner;
pub mod config;
pub mod deserializer;
pub mod error;
pub mod minibatch;
pub mod randomizer;
pub mod window;

pub use cleaner::SequenceCleaner;
pub use config::{EpochConfig, Randomization, RandomizationWindow, ReaderConfig};
pub use deserializer::{
    Chunk, ChunkHandle, ChunkId, ChunkInfo, Deserializer, InMemoryDeserializer, InMemorySequence,
    SequenceData, SequenceInfo, StreamDescription,
};
pub use error::{ReaderError, Result};
pub use minibatch::MiniBatch;
pub use randomizer::{
    BlockShuffleStrategy, InOrderStrategy, PrefetchedWindow, Randomizer, ReaderState,
    TimelineStrategy,
};
pub use window::SequenceWindow;
