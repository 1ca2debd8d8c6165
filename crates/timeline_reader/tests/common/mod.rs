use std::sync::Arc;

use timeline_reader::{InMemoryDeserializer, InMemorySequence, MiniBatch, Randomizer};

/// Identity of one emitted sequence, decoded from its payload.
pub type Tag = (u8, u8);

/// Builds a single-stream deserializer where every sequence carries one
/// sample and a `[chunk_id, index_in_chunk]` payload, so tests can track
/// exactly which sequences were emitted and in what order.
pub fn tagged_dataset(chunk_sizes: &[usize]) -> Arc<InMemoryDeserializer> {
    let mut deserializer = InMemoryDeserializer::new(&["tokens"]);
    for (chunk_id, &size) in chunk_sizes.iter().enumerate() {
        let sequences = (0..size)
            .map(|index| InMemorySequence::new(1, vec![vec![chunk_id as u8, index as u8]]))
            .collect();
        deserializer.push_chunk(sequences);
    }
    Arc::new(deserializer)
}

/// Like [`tagged_dataset`], but with an explicit sample count per sequence.
pub fn tagged_dataset_with_lengths(chunks: &[&[u32]]) -> Arc<InMemoryDeserializer> {
    let mut deserializer = InMemoryDeserializer::new(&["tokens"]);
    for (chunk_id, &lengths) in chunks.iter().enumerate() {
        let sequences = lengths
            .iter()
            .enumerate()
            .map(|(index, &num_samples)| {
                InMemorySequence::new(num_samples, vec![vec![chunk_id as u8, index as u8]])
            })
            .collect();
        deserializer.push_chunk(sequences);
    }
    Arc::new(deserializer)
}

/// Decodes the tags of one batch, in emission order.
pub fn batch_tags(batch: &MiniBatch) -> Vec<Tag> {
    batch
        .stream(0)
        .expect("tagged datasets have one stream")
        .iter()
        .map(|data| (data.payload[0], data.payload[1]))
        .collect()
}

/// Observable content of one `get_next_sequences` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub tags: Vec<Tag>,
    pub end_of_sweep: bool,
    pub end_of_epoch: bool,
}

pub fn record(batch: &MiniBatch) -> BatchRecord {
    BatchRecord {
        tags: batch_tags(batch),
        end_of_sweep: batch.end_of_sweep,
        end_of_epoch: batch.end_of_epoch,
    }
}

/// Drains the epoch, returning one record per call including the final
/// end-of-epoch batch.
pub fn drain_epoch(randomizer: &mut Randomizer, max_samples: usize) -> Vec<BatchRecord> {
    let mut records = Vec::new();
    for _ in 0..10_000 {
        let batch = randomizer
            .get_next_sequences(max_samples)
            .expect("get_next_sequences failed while draining the epoch");
        let done = batch.end_of_epoch;
        records.push(record(&batch));
        if done {
            return records;
        }
    }
    panic!("epoch did not terminate within 10000 calls");
}

/// All non-marker tags of a drained epoch, flattened in emission order.
pub fn emitted_tags(records: &[BatchRecord]) -> Vec<Tag> {
    records.iter().flat_map(|r| r.tags.iter().copied()).collect()
}
