//! Immutable coalesced run of adjacent same-shard chunks (§3), used only for
//! routing. Carries no version and, per §9's back-reference guidance, no
//! pointer back to its owning manager -- a `ChunkRange` is a plain value
//! the index hands out by `Arc`.

use std::sync::Arc;

use data_types::{ShardId, ShardKey};
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum ChunkRangeError {
    #[snafu(display("cannot merge ranges on different shards ({a} != {b})"))]
    ShardMismatch { a: String, b: String },

    #[snafu(display("cannot merge non-adjacent ranges ({a_max:?} != {b_min:?})"))]
    NotAdjacent { a_max: ShardKey, b_min: ShardKey },
}

pub type Result<T, E = ChunkRangeError> = std::result::Result<T, E>;

/// One maximal run of chunks sharing a shard, `[min, max)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRange {
    shard: ShardId,
    min: ShardKey,
    max: ShardKey,
}

impl ChunkRange {
    /// Construct directly from known bounds. Used when coalescing a slice
    /// of the chunk map: the caller has already checked every chunk in the
    /// slice shares `shard`.
    pub fn new(shard: ShardId, min: ShardKey, max: ShardKey) -> Self {
        Self { shard, min, max }
    }

    /// Merge two adjacent ranges that share a shard (§3: "also from two
    /// adjacent ranges with equal shard and meeting endpoints").
    pub fn merge(a: &ChunkRange, b: &ChunkRange) -> Result<ChunkRange> {
        if a.shard != b.shard {
            return Err(ChunkRangeError::ShardMismatch {
                a: a.shard.to_string(),
                b: b.shard.to_string(),
            });
        }
        if a.max != b.min {
            return Err(ChunkRangeError::NotAdjacent {
                a_max: a.max.clone(),
                b_min: b.min.clone(),
            });
        }
        Ok(ChunkRange {
            shard: a.shard.clone(),
            min: a.min.clone(),
            max: b.max.clone(),
        })
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    pub fn min(&self) -> &ShardKey {
        &self.min
    }

    pub fn max(&self) -> &ShardKey {
        &self.max
    }
}

/// A handle to a [`ChunkRange`], shared (immutable) among many readers and
/// never mutated after construction (§5 "Shared resources").
pub type ChunkRangeRef = Arc<ChunkRange>;
