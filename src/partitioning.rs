//! # Partitioning
//!
//! Routes records to processing shards by entity identity and materializes
//! the repartition + sort step that precedes merging.
//!
//! ```text
//!   events / states
//!         │
//!   hash(domain, entity_id) % N      (time bucket never hashed)
//!         │
//! ┌───────┴────────┬────────────────┐
//! ▼                ▼                ▼
//! Shard 0          Shard 1    ...   Shard N-1
//! sorted by key    sorted by key    sorted by key
//! ```

use crate::error::{ReconstructionError, Result};
use crate::keys::{Keyed, PartitionKey};
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, instrument};

/// Batches above this size are routed with a parallel fold.
const PARALLEL_ROUTING_THRESHOLD: usize = 1000;

/// Assigns records to buckets using only the entity-identity component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    partition_count: usize,
}

impl Partitioner {
    /// Create a partitioner with `partition_count` buckets.
    ///
    /// # Errors
    /// Returns [`ReconstructionError::InvalidPartitionCount`] for zero.
    pub fn new(partition_count: usize) -> Result<Self> {
        if partition_count == 0 {
            return Err(ReconstructionError::InvalidPartitionCount(partition_count));
        }
        Ok(Self { partition_count })
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Bucket index for a key, stable across runs for identical input.
    #[inline]
    pub fn partition(&self, key: &PartitionKey) -> usize {
        let mut hasher = FxHasher::default();
        key.domain.hash(&mut hasher);
        key.entity_id.hash(&mut hasher);
        (hasher.finish() % self.partition_count as u64) as usize
    }
}

/// A set of independently processable shards, each sorted ascending by the
/// records' sort key.
#[derive(Debug, Clone)]
pub struct PartitionedCollection<T> {
    shards: Vec<Vec<T>>,
}

impl<T> PartitionedCollection<T>
where
    T: Keyed + Send,
{
    /// Route every record to its bucket, then sort each bucket.
    ///
    /// Sorting is stable, so records with equal keys keep their input order.
    #[instrument(skip(records, partitioner), level = "debug")]
    pub fn repartition_and_sort(records: Vec<T>, partitioner: &Partitioner) -> Self {
        let partition_count = partitioner.partition_count();
        let record_count = records.len();

        let mut shards: Vec<Vec<T>> = if record_count > PARALLEL_ROUTING_THRESHOLD {
            records
                .into_par_iter()
                .fold(
                    || empty_shards(partition_count),
                    |mut acc, record| {
                        let idx = partitioner.partition(record.partition_key());
                        acc[idx].push(record);
                        acc
                    },
                )
                .reduce(
                    || empty_shards(partition_count),
                    |mut a, b| {
                        for (i, shard) in b.into_iter().enumerate() {
                            a[i].extend(shard);
                        }
                        a
                    },
                )
        } else {
            let mut shards = empty_shards(partition_count);
            for record in records {
                let idx = partitioner.partition(record.partition_key());
                shards[idx].push(record);
            }
            shards
        };

        shards
            .par_iter_mut()
            .for_each(|shard| shard.sort_by(|a, b| a.sort_key().cmp(b.sort_key())));

        debug!(
            records = record_count,
            partitions = partition_count,
            "repartitioned and sorted"
        );
        Self { shards }
    }
}

impl<T> PartitionedCollection<T> {
    pub fn partition_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[Vec<T>] {
        &self.shards
    }

    pub fn into_shards(self) -> Vec<Vec<T>> {
        self.shards
    }

    /// Total number of records across shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(Vec::is_empty)
    }
}

fn empty_shards<T>(count: usize) -> Vec<Vec<T>> {
    (0..count).map(|_| Vec::new()).collect()
}
