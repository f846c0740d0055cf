//! Coalesced view over the chunk map (§4.2): a cache, not a source of
//! truth. Routing efficiency depends on it; correctness of the chunk map
//! itself does not (§9 "Coalesced range view").

use std::{
    collections::BTreeMap,
    ops::Bound::{Excluded, Included, Unbounded},
    sync::Arc,
};

use data_types::{OrderedShardKey, ShardKey, ShardKeyPattern};
use observability_deps::tracing::trace;
use snafu::Snafu;

use crate::{
    chunk::Chunk,
    chunk_range::{ChunkRange, ChunkRangeRef},
};

#[derive(Debug, Snafu)]
pub enum RangeIndexError {
    #[snafu(display("range index is empty"))]
    Empty,

    #[snafu(display(
        "range index invalid: first range min {first_min:?} != global min {global_min:?}"
    ))]
    FirstMinMismatch {
        first_min: ShardKey,
        global_min: ShardKey,
    },

    #[snafu(display(
        "range index invalid: last range max {last_max:?} != global max {global_max:?}"
    ))]
    LastMaxMismatch {
        last_max: ShardKey,
        global_max: ShardKey,
    },

    #[snafu(display("range index invalid: gap or overlap between {prev_max:?} and {next_min:?}"))]
    GapOrOverlap {
        prev_max: ShardKey,
        next_min: ShardKey,
    },

    #[snafu(display("range index invalid: map key {key:?} != range max {range_max:?}"))]
    KeyMismatch {
        key: ShardKey,
        range_max: ShardKey,
    },

    #[snafu(display("chunk with max {chunk_max:?} is not covered by a matching range"))]
    ChunkNotCovered { chunk_max: ShardKey },
}

pub type Result<T, E = RangeIndexError> = std::result::Result<T, E>;

/// Ordered mapping `max_key -> ChunkRange`.
///
/// Keyed on [`OrderedShardKey`] rather than `ShardKey` directly: the chunk
/// map this is built from is keyed the same way (§9, `ChunkManager`), and a
/// plain `ShardKey`-keyed `BTreeMap` would silently physically sort by
/// ascending lexicographic order regardless of the pattern's per-field
/// `Direction`, desynchronizing this index's iteration order from the
/// pattern it is meant to route for. The pattern is carried alongside the
/// map so every probe key built internally goes through the same
/// direction-aware wrapping.
#[derive(Debug)]
pub struct ChunkRangeIndex {
    pattern: ShardKeyPattern,
    ranges: BTreeMap<OrderedShardKey, ChunkRangeRef>,
}

impl ChunkRangeIndex {
    pub fn new(pattern: &ShardKeyPattern) -> Self {
        Self {
            pattern: pattern.clone(),
            ranges: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Ranges in ascending (pattern) order.
    pub fn ranges(&self) -> impl Iterator<Item = &ChunkRangeRef> {
        self.ranges.values()
    }

    /// The range covering `key`, found via `upper_bound` as the chunk map
    /// does (§3, §9 "ChunkMap key is the upper bound").
    pub fn range_covering(&self, key: &ShardKey) -> Option<&ChunkRangeRef> {
        let probe = self.pattern.order_key(key.clone());
        self.ranges.range((Excluded(probe), Unbounded)).next().map(|(_, r)| r)
    }

    /// `reload_all`: clear and re-coalesce the whole chunk map.
    pub fn reload_all(&mut self, chunks: &BTreeMap<OrderedShardKey, Chunk>) -> Result<()> {
        self.ranges.clear();
        for range in coalesce(chunks.iter()) {
            let key = self.pattern.order_key(range.max().clone());
            self.ranges.insert(key, Arc::new(range));
        }
        Ok(())
    }

    /// `reload_range`: incrementally re-coalesce only the slice of the
    /// chunk map straddling `[min, max)`, then fix up the two boundaries
    /// against their neighbors (§4.2).
    pub fn reload_range(
        &mut self,
        chunks: &BTreeMap<OrderedShardKey, Chunk>,
        min: &ShardKey,
        max: &ShardKey,
    ) -> Result<()> {
        if self.ranges.is_empty() {
            return self.reload_all(chunks);
        }

        let min_probe = self.pattern.order_key(min.clone());
        let max_probe = self.pattern.order_key(max.clone());

        // low = upper_bound(min), high = lower_bound(max), both on the
        // range index itself.
        let low_key = self
            .ranges
            .range((Excluded(min_probe), Unbounded))
            .next()
            .map(|(k, _)| k.clone())
            .ok_or(RangeIndexError::Empty)?;
        let high_key = self
            .ranges
            .range((Included(max_probe), Unbounded))
            .next()
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| self.ranges.keys().next_back().unwrap().clone());

        let effective_min = self.ranges[&low_key].min().clone();
        let effective_max = self.ranges[&high_key].max().clone();

        // Erase [low, high] inclusive.
        let to_remove: Vec<OrderedShardKey> = self
            .ranges
            .range(low_key.clone()..=high_key.clone())
            .map(|(k, _)| k.clone())
            .collect();
        for k in to_remove {
            self.ranges.remove(&k);
        }

        // Re-coalesce the affected chunk-map slice: chunks whose max is in
        // (effective_min, effective_max].
        let slice_lo = self.pattern.order_key(effective_min.clone());
        let slice_hi = self.pattern.order_key(effective_max.clone());
        let slice = chunks.range((Excluded(slice_lo), Included(slice_hi)));
        for range in coalesce(slice) {
            let key = self.pattern.order_key(range.max().clone());
            self.ranges.insert(key, Arc::new(range));
        }

        self.fixup_boundary_down(&effective_min)?;
        #[cfg(debug_assertions)]
        self.assert_valid(chunks)?;

        self.fixup_boundary_up(&effective_max)?;
        #[cfg(debug_assertions)]
        self.assert_valid(chunks)?;

        Ok(())
    }

    /// Merge the range ending exactly at `boundary` (the old predecessor,
    /// untouched by the erase) with the new range starting at `boundary`,
    /// if they share a shard.
    fn fixup_boundary_down(&mut self, boundary: &ShardKey) -> Result<()> {
        let probe = self.pattern.order_key(boundary.clone());
        let Some(pred) = self.ranges.get(&probe).cloned() else {
            return Ok(());
        };
        let Some((next_key, next)) = self
            .ranges
            .range((Excluded(probe), Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
        else {
            return Ok(());
        };
        if pred.shard() == next.shard() {
            trace!(?boundary, next_key = ?next_key.key(), "coalescing range index boundary down");
            let merged = ChunkRange::merge(&pred, &next)
                .expect("adjacent ranges with matching shard must be mergeable");
            self.ranges.remove(&self.pattern.order_key(boundary.clone()));
            self.ranges.remove(&next_key);
            let merged_key = self.pattern.order_key(merged.max().clone());
            self.ranges.insert(merged_key, Arc::new(merged));
        }
        Ok(())
    }

    /// Merge the range now ending at `boundary` with its successor if they
    /// share a shard.
    fn fixup_boundary_up(&mut self, boundary: &ShardKey) -> Result<()> {
        let probe = self.pattern.order_key(boundary.clone());
        let Some(cur) = self.ranges.get(&probe).cloned() else {
            return Ok(());
        };
        let Some((next_key, next)) = self
            .ranges
            .range((Excluded(probe), Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
        else {
            return Ok(());
        };
        if cur.shard() == next.shard() {
            trace!(?boundary, next_key = ?next_key.key(), "coalescing range index boundary up");
            let merged = ChunkRange::merge(&cur, &next)
                .expect("adjacent ranges with matching shard must be mergeable");
            self.ranges.remove(&self.pattern.order_key(boundary.clone()));
            self.ranges.remove(&next_key);
            let merged_key = self.pattern.order_key(merged.max().clone());
            self.ranges.insert(merged_key, Arc::new(merged));
        }
        Ok(())
    }

    /// Enforce every ChunkRangeIndex invariant of §3/§4.2.
    pub fn assert_valid(&self, chunks: &BTreeMap<OrderedShardKey, Chunk>) -> Result<()> {
        self.assert_valid_against(chunks, None)
    }

    pub fn assert_valid_with_pattern(
        &self,
        chunks: &BTreeMap<OrderedShardKey, Chunk>,
        pattern: &ShardKeyPattern,
    ) -> Result<()> {
        self.assert_valid_against(chunks, Some(pattern))
    }

    fn assert_valid_against(
        &self,
        chunks: &BTreeMap<OrderedShardKey, Chunk>,
        pattern: Option<&ShardKeyPattern>,
    ) -> Result<()> {
        if self.ranges.is_empty() {
            return Err(RangeIndexError::Empty);
        }

        if let Some(pattern) = pattern {
            let (first_min, last_max) = (
                self.ranges.values().next().unwrap().min().clone(),
                self.ranges.values().next_back().unwrap().max().clone(),
            );
            if first_min != pattern.global_min() {
                return Err(RangeIndexError::FirstMinMismatch {
                    first_min,
                    global_min: pattern.global_min(),
                });
            }
            if last_max != pattern.global_max() {
                return Err(RangeIndexError::LastMaxMismatch {
                    last_max,
                    global_max: pattern.global_max(),
                });
            }
        }

        // Key equals value's max; no gaps or overlaps between consecutive
        // entries.
        let mut prev_max: Option<ShardKey> = None;
        for (key, range) in &self.ranges {
            if key.key() != range.max() {
                return Err(RangeIndexError::KeyMismatch {
                    key: key.key().clone(),
                    range_max: range.max().clone(),
                });
            }
            if let Some(prev_max) = prev_max {
                if &prev_max != range.min() {
                    return Err(RangeIndexError::GapOrOverlap {
                        prev_max,
                        next_min: range.min().clone(),
                    });
                }
            }
            prev_max = Some(range.max().clone());
        }

        // Every chunk covered by exactly one range with a matching shard.
        for chunk in chunks.values() {
            match self.range_covering(chunk.min()) {
                Some(range) if range.shard() == chunk.shard() => {}
                _ => {
                    return Err(RangeIndexError::ChunkNotCovered {
                        chunk_max: chunk.max().clone(),
                    })
                }
            }
        }

        Ok(())
    }
}

/// Walk `chunks` in ascending (pattern) order and group consecutive
/// same-shard runs into [`ChunkRange`]s.
fn coalesce<'a>(
    chunks: impl Iterator<Item = (&'a OrderedShardKey, &'a Chunk)>,
) -> Vec<ChunkRange> {
    let mut out = Vec::new();
    let mut current: Option<(data_types::ShardId, ShardKey, ShardKey)> = None; // (shard, min, max)

    for (_, chunk) in chunks {
        match &mut current {
            Some((shard, _, max)) if shard == chunk.shard() => {
                *max = chunk.max().clone();
            }
            Some((shard, min, max)) => {
                out.push(ChunkRange::new(shard.clone(), min.clone(), max.clone()));
                current = Some((chunk.shard().clone(), chunk.min().clone(), chunk.max().clone()));
            }
            None => {
                current = Some((chunk.shard().clone(), chunk.min().clone(), chunk.max().clone()));
            }
        }
    }
    if let Some((shard, min, max)) = current {
        out.push(ChunkRange::new(shard, min, max));
    }
    out
}
