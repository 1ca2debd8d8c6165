//! The deserializer contract and the data model it exposes.
//!
//! A [`Deserializer`] presents raw training data as an ordered list of
//! chunks; each chunk yields one or more sequences, and each sequence
//! carries one payload per stream. The order of [`Deserializer::chunk_infos`]
//! defines the original timeline and must be stable for the whole run.
//!
//! Chunks are materialized on demand through [`Deserializer::get_chunk`],
//! which may block on I/O and must tolerate concurrent calls: the randomizer
//! fetches the next window on a background thread while the consumer is
//! still holding chunks from previous windows.

use std::sync::Arc;

/// Stable identity of a chunk within the timeline.
pub type ChunkId = u32;

/// Descriptor of one chunk, produced once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkInfo {
    pub id: ChunkId,
    pub number_of_samples: usize,
    pub number_of_sequences: usize,
}

/// Descriptor of one sequence. Identified by `(chunk_id, index_in_chunk)`.
///
/// `num_samples` is positive for every sequence a deserializer produces;
/// the only exception is the reserved [`SequenceInfo::END_OF_SWEEP`] marker,
/// which the randomizer inserts between sweeps and which never originates
/// from a deserializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceInfo {
    pub chunk_id: ChunkId,
    pub index_in_chunk: u32,
    pub num_samples: u32,
}

impl SequenceInfo {
    /// Sentinel separating sweeps, all fields at their type maximum.
    pub const END_OF_SWEEP: SequenceInfo = SequenceInfo {
        chunk_id: ChunkId::MAX,
        index_in_chunk: u32::MAX,
        num_samples: u32::MAX,
    };

    pub fn is_end_of_sweep(&self) -> bool {
        *self == Self::END_OF_SWEEP
    }
}

/// Metadata of one input stream, passed through to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub id: usize,
    pub name: String,
}

/// Payload of one sequence on one stream.
///
/// The payload bytes are opaque to the randomizer; the packer downstream
/// interprets them. `is_valid` is false when the deserializer could not
/// materialize the sequence — such entries are removed by the cleaner
/// instead of failing the batch.
#[derive(Debug, Clone)]
pub struct SequenceData {
    pub num_samples: u32,
    pub payload: Arc<[u8]>,
    pub is_valid: bool,
}

impl SequenceData {
    pub fn new(num_samples: u32, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            num_samples,
            payload: payload.into(),
            is_valid: true,
        }
    }

    /// A placeholder for a sequence that failed materialization.
    pub fn invalid() -> Self {
        Self {
            num_samples: 0,
            payload: Arc::from(Vec::new()),
            is_valid: false,
        }
    }
}

/// A materialized chunk. Handles are shared between the active window, the
/// prefetched window and any mini-batch the consumer still holds; the chunk
/// is released when the last holder drops it.
pub trait Chunk: Send + Sync {
    /// Appends the chunk's sequence descriptors in timeline order.
    fn sequence_infos(&self, out: &mut Vec<SequenceInfo>);

    /// Appends the per-stream payloads of one sequence to `out`.
    fn get_sequence(&self, index_in_chunk: u32, out: &mut Vec<SequenceData>) -> anyhow::Result<()>;
}

pub type ChunkHandle = Arc<dyn Chunk>;

/// Provider of the raw timeline.
pub trait Deserializer: Send + Sync {
    /// The full ordered chunk list. Pure and stable across the run.
    fn chunk_infos(&self) -> Vec<ChunkInfo>;

    /// Metadata of the streams every sequence carries.
    fn stream_descriptions(&self) -> Vec<StreamDescription>;

    /// Materializes a chunk. May block on I/O; must be safe to call
    /// concurrently with other `get_chunk` invocations.
    fn get_chunk(&self, chunk_id: ChunkId) -> anyhow::Result<ChunkHandle>;
}

/// -------------------------------------------------------------------------------------
/// In-memory deserializer
///
/// Serves already-resident data through the [`Deserializer`] contract.
/// Chunk ids are assigned in push order, so the push order is the original
/// timeline. Mostly useful for tests, benchmarks and small datasets.
///
/// # Example
/// ```ignore
/// let mut deserializer = InMemoryDeserializer::new(&["tokens", "labels"]);
/// deserializer.push_chunk(vec![
///     InMemorySequence::new(3, vec![b"abc".to_vec(), b"x".to_vec()]),
///     InMemorySequence::new(1, vec![b"d".to_vec(), b"y".to_vec()]),
/// ]);
/// ```
pub struct InMemoryDeserializer {
    streams: Vec<StreamDescription>,
    chunks: Vec<Arc<InMemoryChunk>>,
}

/// Builder input for one sequence of an [`InMemoryDeserializer`] chunk:
/// a sample count plus one payload per stream.
#[derive(Debug, Clone)]
pub struct InMemorySequence {
    pub num_samples: u32,
    pub payloads: Vec<Vec<u8>>,
    pub valid: bool,
}

impl InMemorySequence {
    pub fn new(num_samples: u32, payloads: Vec<Vec<u8>>) -> Self {
        Self {
            num_samples,
            payloads,
            valid: true,
        }
    }

    /// A sequence whose materialization fails, exercising the cleaner.
    pub fn invalid(num_samples: u32) -> Self {
        Self {
            num_samples,
            payloads: Vec::new(),
            valid: false,
        }
    }
}

struct StoredSequence {
    num_samples: u32,
    payloads: Vec<Arc<[u8]>>,
    valid: bool,
}

struct InMemoryChunk {
    id: ChunkId,
    num_streams: usize,
    sequences: Vec<StoredSequence>,
}

impl InMemoryDeserializer {
    pub fn new(stream_names: &[&str]) -> Self {
        let streams = stream_names
            .iter()
            .enumerate()
            .map(|(id, name)| StreamDescription {
                id,
                name: (*name).to_string(),
            })
            .collect();
        Self {
            streams,
            chunks: Vec::new(),
        }
    }

    /// Appends a chunk to the timeline and returns its id.
    pub fn push_chunk(&mut self, sequences: Vec<InMemorySequence>) -> ChunkId {
        let id = self.chunks.len() as ChunkId;
        let stored = sequences
            .into_iter()
            .map(|s| StoredSequence {
                num_samples: s.num_samples,
                payloads: s.payloads.into_iter().map(Arc::from).collect(),
                valid: s.valid,
            })
            .collect();
        self.chunks.push(Arc::new(InMemoryChunk {
            id,
            num_streams: self.streams.len(),
            sequences: stored,
        }));
        id
    }
}

impl Deserializer for InMemoryDeserializer {
    fn chunk_infos(&self) -> Vec<ChunkInfo> {
        self.chunks
            .iter()
            .map(|c| ChunkInfo {
                id: c.id,
                number_of_samples: c
                    .sequences
                    .iter()
                    .map(|s| s.num_samples as usize)
                    .sum(),
                number_of_sequences: c.sequences.len(),
            })
            .collect()
    }

    fn stream_descriptions(&self) -> Vec<StreamDescription> {
        self.streams.clone()
    }

    fn get_chunk(&self, chunk_id: ChunkId) -> anyhow::Result<ChunkHandle> {
        let chunk = self
            .chunks
            .get(chunk_id as usize)
            .ok_or_else(|| anyhow::anyhow!("unknown chunk id {chunk_id}"))?;
        Ok(Arc::clone(chunk) as ChunkHandle)
    }
}

impl Chunk for InMemoryChunk {
    fn sequence_infos(&self, out: &mut Vec<SequenceInfo>) {
        out.extend(self.sequences.iter().enumerate().map(|(index, s)| {
            SequenceInfo {
                chunk_id: self.id,
                index_in_chunk: index as u32,
                num_samples: s.num_samples,
            }
        }));
    }

    fn get_sequence(&self, index_in_chunk: u32, out: &mut Vec<SequenceData>) -> anyhow::Result<()> {
        let sequence = self
            .sequences
            .get(index_in_chunk as usize)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "sequence index {index_in_chunk} out of range for chunk {}",
                    self.id
                )
            })?;
        if !sequence.valid {
            out.extend((0..self.num_streams).map(|_| SequenceData::invalid()));
            return Ok(());
        }
        out.extend(
            sequence
                .payloads
                .iter()
                .map(|p| SequenceData::new(sequence.num_samples, Arc::clone(p))),
        );
        Ok(())
    }
}

/// -------------------------------------------------------------------------------------
/// Tests
#[cfg(test)]
mod tests {
    use super::*;

    fn two_chunk_deserializer() -> InMemoryDeserializer {
        let mut deserializer = InMemoryDeserializer::new(&["tokens"]);
        deserializer.push_chunk(vec![
            InMemorySequence::new(2, vec![b"ab".to_vec()]),
            InMemorySequence::new(1, vec![b"c".to_vec()]),
        ]);
        deserializer.push_chunk(vec![InMemorySequence::new(3, vec![b"def".to_vec()])]);
        deserializer
    }

    #[test]
    fn chunk_infos_reflect_pushed_data() {
        let deserializer = two_chunk_deserializer();
        let infos = deserializer.chunk_infos();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, 0);
        assert_eq!(infos[0].number_of_samples, 3);
        assert_eq!(infos[0].number_of_sequences, 2);
        assert_eq!(infos[1].number_of_samples, 3);
        assert_eq!(infos[1].number_of_sequences, 1);
    }

    #[test]
    fn sequence_infos_follow_chunk_order() {
        let deserializer = two_chunk_deserializer();
        let chunk = deserializer.get_chunk(0).unwrap();
        let mut infos = Vec::new();
        chunk.sequence_infos(&mut infos);
        assert_eq!(
            infos,
            vec![
                SequenceInfo {
                    chunk_id: 0,
                    index_in_chunk: 0,
                    num_samples: 2
                },
                SequenceInfo {
                    chunk_id: 0,
                    index_in_chunk: 1,
                    num_samples: 1
                },
            ]
        );
    }

    #[test]
    fn get_sequence_yields_one_payload_per_stream() {
        let mut deserializer = InMemoryDeserializer::new(&["tokens", "labels"]);
        deserializer.push_chunk(vec![InMemorySequence::new(
            1,
            vec![b"t".to_vec(), b"l".to_vec()],
        )]);

        let chunk = deserializer.get_chunk(0).unwrap();
        let mut row = Vec::new();
        chunk.get_sequence(0, &mut row).unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(&*row[0].payload, b"t");
        assert_eq!(&*row[1].payload, b"l");
        assert!(row.iter().all(|d| d.is_valid));
    }

    #[test]
    fn invalid_sequences_are_marked_per_stream() {
        let mut deserializer = InMemoryDeserializer::new(&["tokens", "labels"]);
        deserializer.push_chunk(vec![InMemorySequence::invalid(4)]);

        let chunk = deserializer.get_chunk(0).unwrap();
        let mut row = Vec::new();
        chunk.get_sequence(0, &mut row).unwrap();
        assert_eq!(row.len(), 2);
        assert!(row.iter().all(|d| !d.is_valid));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let deserializer = two_chunk_deserializer();
        assert!(deserializer.get_chunk(7).is_err());

        let chunk = deserializer.get_chunk(1).unwrap();
        let mut row = Vec::new();
        assert!(chunk.get_sequence(5, &mut row).is_err());
    }

    #[test]
    fn end_of_sweep_marker_is_distinguished() {
        let marker = SequenceInfo::END_OF_SWEEP;
        assert!(marker.is_end_of_sweep());

        let ordinary = SequenceInfo {
            chunk_id: 0,
            index_in_chunk: 0,
            num_samples: 1,
        };
        assert!(!ordinary.is_end_of_sweep());
    }
}
