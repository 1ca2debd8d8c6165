//! The in-memory window of currently visible sequences.

use std::collections::HashMap;

use crate::deserializer::{ChunkHandle, ChunkId, SequenceInfo};

/// Buffer holding the sequences the consumer is currently draining, plus the
/// materialized chunks they reference.
///
/// Invariants:
/// - every non-marker entry of `sequences` has its chunk in `chunks`;
/// - `sequence_position` is in `[0, sequences.len()]`.
///
/// The window itself is a pure data container; the randomizer base and its
/// strategy perform all mutations on the consumer thread.
#[derive(Default)]
pub struct SequenceWindow {
    pub sequences: Vec<SequenceInfo>,
    pub chunks: HashMap<ChunkId, ChunkHandle>,
    pub sequence_position: usize,
}

impl std::fmt::Debug for SequenceWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceWindow")
            .field("sequences", &self.sequences)
            .field("chunks", &self.chunks.len())
            .field("sequence_position", &self.sequence_position)
            .finish()
    }
}

impl SequenceWindow {
    /// Drops the window contents. The cursor is left alone; the base owns it.
    pub fn clear(&mut self) {
        self.sequences.clear();
        self.chunks.clear();
    }
}
