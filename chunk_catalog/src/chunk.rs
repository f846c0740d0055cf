//! One half-open range `[min, max)` resident on one shard (§3, §4.1).
//!
//! `Chunk` carries no back-reference to its owning manager (§9: "use a
//! lookup... rather than a raw self-referential pointer graph"). Its
//! methods either are pure (`contains`, `filter`, `gen_id`) or take the
//! collaborators they need as parameters (`pick_split_point` takes a
//! `&dyn ShardBackend`). The orchestration steps that mutate the manager's
//! chunk map and range index, persist, and emit a change-log event --
//! `split`, `move_and_commit`, `drop` in the distilled spec -- live on
//! [`crate::manager::ChunkManager`] instead, which is the only thing that
//! owns the map and the lock. See `DESIGN.md` for the write-up of this
//! choice.

use data_types::{ChunkVersion, KeyValue, NamespaceName, ShardId, ShardKey, ShardKeyPattern};
use observability_deps::tracing::warn;
use snafu::Snafu;

use crate::collaborators::{BackendError, ShardBackend, ShardPicker};

/// Errors raised directly by [`Chunk`]'s own operations (§7, precondition
/// violations and external failures scoped to one chunk).
#[derive(Debug, Snafu)]
pub enum ChunkError {
    #[snafu(display("cannot split -- only one distinct value?"))]
    CannotSplit,

    #[snafu(display("cannot move chunk to its own shard"))]
    MoveToSelf,

    #[snafu(display("backend call failed: {source}"))]
    Backend { source: BackendError },
}

impl From<BackendError> for ChunkError {
    fn from(source: BackendError) -> Self {
        Self::Backend { source }
    }
}

pub type Result<T, E = ChunkError> = std::result::Result<T, E>;

/// One half-open chunk `[min, max)` on one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    namespace: NamespaceName,
    min: ShardKey,
    max: ShardKey,
    shard: ShardId,
    version: ChunkVersion,
    data_written: u64,
    modified: bool,
    id: Option<String>,
}

/// Outcome of evaluating whether a chunk should be split right now (§4.1
/// `split_if_should`). The actual map/persistence mutation is the
/// manager's job; this is purely the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosplitDecision {
    /// No split: below threshold, split point unusable, or datasize still
    /// under the threshold.
    NoSplit,
    /// Split at this key.
    SplitAt(ShardKey),
}

/// Outcome of the automove heuristic (§4.1 `move_if_should`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomoveDecision {
    /// Policy is undecidable with current chunk counts; do nothing.
    NoMove,
    /// Migrate the newly split-off chunk.
    MoveNew(ShardId),
    /// Migrate the original (self) chunk instead.
    MoveSelf(ShardId),
}

impl Chunk {
    /// Construct a brand-new, never-persisted chunk. Used by bootstrap
    /// (§3 lifecycle) and by `split_at`.
    pub fn new(namespace: NamespaceName, min: ShardKey, max: ShardKey, shard: ShardId) -> Self {
        Self {
            namespace,
            min,
            max,
            shard,
            version: ChunkVersion::ZERO,
            data_written: 0,
            modified: true,
            id: None,
        }
    }

    /// Reconstruct a chunk from a persisted record (§4.1 `unserialize`).
    pub fn from_persisted(
        namespace: NamespaceName,
        min: ShardKey,
        max: ShardKey,
        shard: ShardId,
        version: ChunkVersion,
        id: String,
    ) -> Self {
        Self {
            namespace,
            min,
            max,
            shard,
            version,
            data_written: 0,
            modified: false,
            id: Some(id),
        }
    }

    pub fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }

    pub fn min(&self) -> &ShardKey {
        &self.min
    }

    pub fn max(&self) -> &ShardKey {
        &self.max
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    pub fn version(&self) -> ChunkVersion {
        self.version
    }

    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn data_written(&self) -> u64 {
        self.data_written
    }

    /// `min ≤ extract_key(doc) < max`, per §3.
    pub fn contains(&self, key: &ShardKey, pattern: &ShardKeyPattern) -> bool {
        pattern.compare(&self.min, key) != std::cmp::Ordering::Greater
            && pattern.compare(key, &self.max) == std::cmp::Ordering::Less
    }

    /// Whether `min` is the sentinel `global_min` (§4.1 `min_is_inf`).
    pub fn min_is_inf(&self, pattern: &ShardKeyPattern) -> bool {
        self.min == pattern.global_min()
    }

    /// Whether `max` is the sentinel `global_max` (§4.1 `max_is_inf`).
    pub fn max_is_inf(&self, pattern: &ShardKeyPattern) -> bool {
        self.max == pattern.global_max()
    }

    /// Deterministic `_id`: `"<ns>-<f1>_<v1><f2>_<v2>..."`, derived from
    /// namespace and `min` (§4.1, §8 "gen_id is injective over (ns, min)").
    pub fn gen_id(ns: &NamespaceName, pattern: &ShardKeyPattern, min: &ShardKey) -> String {
        let mut id = format!("{ns}-");
        for (i, (field, _)) in pattern.fields().iter().enumerate() {
            id.push_str(field);
            id.push('_');
            id.push_str(&min.0[i].to_string());
        }
        id
    }

    /// Record `bytes` of traffic against this chunk's write accumulator,
    /// the input to `split_if_should` (§4.1).
    pub fn record_write(&mut self, bytes: u64) {
        self.data_written = self.data_written.saturating_add(bytes);
    }

    pub fn reset_write_counter(&mut self) {
        self.data_written = 0;
    }

    pub fn mark_unmodified(&mut self) {
        self.modified = false;
    }

    /// Force this chunk into the next `save()`'s write set without changing
    /// its bounds or shard. Used by `ChunkManager::migrate` to bump a
    /// surviving chunk's version on the donor shard when the migrated chunk
    /// was the last one there (§4.1, §9 "moving the last chunk off a
    /// shard").
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub fn set_version(&mut self, version: ChunkVersion) {
        self.version = version;
    }

    pub fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    /// `pick_split_point` (§4.1).
    pub fn pick_split_point(
        &self,
        pattern: &ShardKeyPattern,
        backend: &dyn ShardBackend,
    ) -> Result<Option<ShardKey>> {
        let min_inf = self.min_is_inf(pattern);
        let max_inf = self.max_is_inf(pattern);

        // Step 1: exactly one end is a sentinel -> bias away from it.
        if min_inf != max_inf {
            let reverse = max_inf; // max is the sentinel -> look from the top
            return Ok(backend.first_document(
                &self.shard,
                &self.namespace,
                pattern,
                &self.min,
                &self.max,
                reverse,
            )?);
        }

        // Step 2: ask the backend for the median.
        let median = backend.median_key(&self.shard, &self.namespace, pattern, &self.min, &self.max)?;

        // Step 3: median degenerates to min -> heavily skewed range, look
        // one document past min instead.
        if median == self.min {
            return Ok(backend.first_document(
                &self.shard,
                &self.namespace,
                pattern,
                &self.min,
                &self.max,
                false,
            )?);
        }

        Ok(Some(median))
    }

    /// Pure split: produce the two resulting chunks without touching any
    /// manager state. `m` must be strictly between `min` and `max`.
    pub fn split_at(&self, m: ShardKey, pattern: &ShardKeyPattern) -> Result<(Chunk, Chunk)> {
        if pattern.compare(&m, &self.min) != std::cmp::Ordering::Greater
            || pattern.compare(&m, &self.max) != std::cmp::Ordering::Less
        {
            return Err(ChunkError::CannotSplit);
        }

        let left = Chunk {
            namespace: self.namespace.clone(),
            min: self.min.clone(),
            max: m.clone(),
            shard: self.shard.clone(),
            version: self.version,
            data_written: 0,
            modified: true,
            id: self.id.clone(),
        };
        let right = Chunk::new(self.namespace.clone(), m, self.max.clone(), self.shard.clone());

        Ok((left, right))
    }

    /// Pure migrate: produce this chunk reassigned to `to`. Does not touch
    /// the backend or the manager's version bookkeeping -- see
    /// `ChunkManager::migrate` for the full protocol (§4.1
    /// `move_and_commit`).
    pub fn migrated_to(&self, to: ShardId) -> Result<Chunk> {
        if to == self.shard {
            return Err(ChunkError::MoveToSelf);
        }
        Ok(Chunk {
            shard: to,
            modified: true,
            ..self.clone()
        })
    }

    /// Evaluate the autosplit trigger (§4.1 `split_if_should`) for
    /// `bytes_written` more bytes landing in this chunk. Threshold is
    /// reduced by 10% when either end is a sentinel, to keep the unbounded
    /// edge chunk pre-split.
    pub fn should_autosplit(
        &mut self,
        bytes_written: u64,
        max_chunk_size: u64,
        pattern: &ShardKeyPattern,
        backend: &dyn ShardBackend,
    ) -> Result<AutosplitDecision> {
        self.record_write(bytes_written);

        let my_max = if self.min_is_inf(pattern) || self.max_is_inf(pattern) {
            max_chunk_size - max_chunk_size / 10
        } else {
            max_chunk_size
        };

        if self.data_written < my_max / 5 {
            return Ok(AutosplitDecision::NoSplit);
        }

        let split_point = match self.pick_split_point(pattern, backend)? {
            Some(p) => p,
            None => {
                warn!(ns = %self.namespace, min = ?self.min, max = ?self.max, "no usable split point for an oversized chunk");
                return Ok(AutosplitDecision::NoSplit);
            }
        };
        if split_point == self.min || split_point == self.max {
            warn!(ns = %self.namespace, min = ?self.min, max = ?self.max, ?split_point, "split point coincides with a chunk boundary, skipping split");
            return Ok(AutosplitDecision::NoSplit);
        }

        let size = backend.datasize(
            &self.shard,
            &self.namespace,
            pattern,
            &self.min,
            &self.max,
            my_max + 1,
        )?;
        if size < my_max {
            return Ok(AutosplitDecision::NoSplit);
        }

        Ok(AutosplitDecision::SplitAt(split_point))
    }

    /// Automove heuristic (§4.1 `move_if_should`), evaluated with `new`
    /// being the chunk freshly split off of `self`.
    pub fn should_automove(
        &self,
        new: &Chunk,
        backend: &dyn ShardBackend,
        pattern: &ShardKeyPattern,
        picker: &dyn ShardPicker,
    ) -> Result<AutomoveDecision> {
        let new_count = backend.count_objects(&new.shard, &new.namespace, pattern, &new.min, &new.max)?;
        if new_count <= 1 {
            return Ok(match picker.pick(&new.shard) {
                Some(dest) if dest != new.shard => AutomoveDecision::MoveNew(dest),
                _ => AutomoveDecision::NoMove,
            });
        }

        let self_count =
            backend.count_objects(&self.shard, &self.namespace, pattern, &self.min, &self.max)?;
        if self_count <= 1 {
            return Ok(match picker.pick(&self.shard) {
                Some(dest) if dest != self.shard => AutomoveDecision::MoveSelf(dest),
                _ => AutomoveDecision::NoMove,
            });
        }

        Ok(AutomoveDecision::NoMove)
    }

    /// First-field value, the only part of the shard key the §4.3 query
    /// planner looks at.
    pub fn first_field(&self) -> &KeyValue {
        self.min.first_field()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::FakeBackend;
    use data_types::Direction;

    fn pattern() -> ShardKeyPattern {
        ShardKeyPattern::new(vec![("a".into(), Direction::Ascending)])
    }

    fn ns() -> NamespaceName {
        NamespaceName::new("t.c").unwrap()
    }

    fn shard(name: &str) -> ShardId {
        ShardId::new(name).unwrap()
    }

    fn int(v: i64) -> ShardKey {
        ShardKey::new(vec![KeyValue::Int(v)])
    }

    #[test]
    fn split_refusal_on_endpoint() {
        let chunk = Chunk::new(ns(), int(0), int(100), shard("S0"));
        let pattern = pattern();
        assert!(matches!(
            chunk.split_at(int(0), &pattern),
            Err(ChunkError::CannotSplit)
        ));
        assert!(matches!(
            chunk.split_at(int(100), &pattern),
            Err(ChunkError::CannotSplit)
        ));
    }

    #[test]
    fn split_at_median_produces_two_chunks() {
        let chunk = Chunk::new(ns(), int(0), int(100), shard("S0"));
        let pattern = pattern();
        let (left, right) = chunk.split_at(int(50), &pattern).unwrap();

        assert_eq!(left.min(), &int(0));
        assert_eq!(left.max(), &int(50));
        assert_eq!(right.min(), &int(50));
        assert_eq!(right.max(), &int(100));
        assert_eq!(left.shard(), &shard("S0"));
        assert_eq!(right.shard(), &shard("S0"));
        assert!(left.modified() && right.modified());
    }

    #[test]
    fn migrate_to_self_is_rejected() {
        let chunk = Chunk::new(ns(), int(0), int(100), shard("S0"));
        assert!(matches!(
            chunk.migrated_to(shard("S0")),
            Err(ChunkError::MoveToSelf)
        ));
    }

    #[test]
    fn pick_split_point_uses_median() {
        let chunk = Chunk::new(ns(), int(0), int(100), shard("S0"));
        let pattern = pattern();
        let backend = FakeBackend::default();
        backend.set_median(&int(0), &int(100), int(50));

        let point = chunk.pick_split_point(&pattern, &backend).unwrap();
        assert_eq!(point, Some(int(50)));
    }

    #[test]
    fn gen_id_is_deterministic_and_field_prefixed() {
        let pattern = pattern();
        let id = Chunk::gen_id(&ns(), &pattern, &int(7));
        assert_eq!(id, "t.c-a_7");
    }
}
