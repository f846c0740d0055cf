//! `ChunkManager` (§4.3): the only thing that owns a namespace's chunk map
//! and range index, and the only thing that takes the lock. Everything
//! else in this crate is either a pure value (`Chunk`, `ChunkRange`) or a
//! collaborator trait; this module is where they get wired together into
//! routing, query planning, split, migrate and drop, the way the teacher's
//! `Partition` (grounded loosely via `querier`'s reconciler) and `router`'s
//! `ShardedCache` own their respective maps and locks.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use data_types::{ChunkVersion, KeyValue, NamespaceName, OrderedShardKey, ShardId, ShardKey, ShardKeyPattern};
use metric::{Registry, U64Counter};
use observability_deps::tracing::info;
use snafu::{OptionExt, ResultExt, Snafu};
use tracker::{RwLock, TryMutex};

use crate::{
    chunk::{AutomoveDecision, AutosplitDecision, Chunk, ChunkError},
    chunk_range::ChunkRangeRef,
    chunk_range_index::{ChunkRangeIndex, RangeIndexError},
    collaborators::{BackendError, ClusterLock, LockError, MetadataStore, PersistedChunk, ShardBackend, ShardPicker, StoreError},
    predicate::{Bound, Predicate},
};

/// Errors raised orchestrating a namespace's chunk map (§7).
#[derive(Debug, Snafu)]
pub enum ManagerError {
    #[snafu(display("unsupported predicate: {reason}"))]
    Unsupported { reason: &'static str },

    #[snafu(display("no chunk covers key {key:?} even after a reload"))]
    RoutingInconsistency { key: ShardKey },

    #[snafu(display("chunk with max {chunk_max:?} not found"))]
    ChunkNotFound { chunk_max: ShardKey },

    #[snafu(display("{source}"))]
    Split { source: ChunkError },

    #[snafu(display("{source}"))]
    Migrate { source: ChunkError },

    #[snafu(display("{source}"))]
    Lock { source: LockError },

    #[snafu(display("{source}"))]
    Store { source: StoreError },

    #[snafu(display("{source}"))]
    Backend { source: BackendError },

    #[snafu(display("{source}"))]
    RangeIndex { source: RangeIndexError },

    #[snafu(display("version on shard {shard} regressed ({old} -> {new}) after a migration"))]
    VersionRegressed {
        shard: String,
        old: ChunkVersion,
        new: ChunkVersion,
    },

    #[snafu(display("persisted record for new chunk {id} does not match what was saved"))]
    SaveRoundTripMismatch { id: String },
}

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;

/// Tunables for one `ChunkManager` (§10.4). No CLI surface: a namespace's
/// config comes from whatever embeds this crate.
#[derive(Debug, Clone, Copy)]
pub struct ChunkManagerConfig {
    /// Soft cap a chunk's data size is allowed to grow to before
    /// `maybe_autosplit` looks for a split point (§4.1). Mongo's historical
    /// default is 64 MiB; kept here for the same reason it was there, a
    /// size that keeps `movechunk` calls cheap without fragmenting the map.
    pub max_chunk_size_bytes: u64,
}

impl Default for ChunkManagerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
struct ManagerState {
    chunks: BTreeMap<OrderedShardKey, Chunk>,
    range_index: ChunkRangeIndex,
}

/// Routing/planning outcome of `chunks_for_query` (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// Predicate can't match anything (an empty range on the shard-key
    /// field, or an equality value outside every chunk).
    Empty,
    /// Predicate constrains the shard key not at all: every shard is live.
    All,
    /// Predicate narrows routing to these coalesced ranges.
    Ranges(Vec<ChunkRangeRef>),
}

#[derive(Debug)]
struct ManagerMetrics {
    splits: U64Counter,
    migrations: U64Counter,
    reloads: U64Counter,
    split_lock_contended: U64Counter,
}

impl ManagerMetrics {
    fn new(registry: &Registry) -> Self {
        Self {
            splits: registry.register_counter("chunk_manager_splits"),
            migrations: registry.register_counter("chunk_manager_migrations"),
            reloads: registry.register_counter("chunk_manager_reloads"),
            split_lock_contended: registry.register_counter("chunk_manager_split_lock_contended"),
        }
    }
}

/// A process-wide, non-blocking lock serializing "only one split/migrate in
/// flight at a time" across every `ChunkManager` in the process (§5). A
/// static rather than a field because the rule is process-wide, not
/// per-namespace.
fn process_split_lock() -> &'static TryMutex {
    static LOCK: OnceLock<TryMutex> = OnceLock::new();
    LOCK.get_or_init(TryMutex::new)
}

/// A process-wide counter handing out `sequence_number` values on every
/// reload or save (§4.3 "monotonic, process-local sequence_number").
fn next_sequence() -> u64 {
    static SEQ: AtomicU64 = AtomicU64::new(1);
    SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Owns one namespace's chunk map, range index and lock, and orchestrates
/// every operation that touches them.
#[derive(Debug)]
pub struct ChunkManager {
    namespace: NamespaceName,
    pattern: ShardKeyPattern,
    #[allow(dead_code)] // carried for parity with the persisted record; not yet load-bearing
    unique: bool,
    config: ChunkManagerConfig,
    state: RwLock<ManagerState>,
    sequence_number: AtomicU64,
    metrics: ManagerMetrics,
    backend: Arc<dyn ShardBackend>,
    store: Arc<dyn MetadataStore>,
    cluster_lock: Arc<dyn ClusterLock>,
    picker: Arc<dyn ShardPicker>,
}

impl ChunkManager {
    /// Load a namespace's chunk map, bootstrapping a single
    /// `[global_min, global_max)` chunk on `primary_shard` if it has never
    /// been sharded before (§3 lifecycle).
    #[allow(clippy::too_many_arguments)]
    pub fn bootstrap(
        namespace: NamespaceName,
        pattern: ShardKeyPattern,
        unique: bool,
        primary_shard: ShardId,
        config: ChunkManagerConfig,
        backend: Arc<dyn ShardBackend>,
        store: Arc<dyn MetadataStore>,
        cluster_lock: Arc<dyn ClusterLock>,
        picker: Arc<dyn ShardPicker>,
        registry: &Registry,
    ) -> Result<Self> {
        let records = store.load(&namespace).context(StoreSnafu)?;
        let chunks = if records.is_empty() {
            let mut map = BTreeMap::new();
            let chunk = Chunk::new(
                namespace.clone(),
                pattern.global_min(),
                pattern.global_max(),
                primary_shard,
            );
            map.insert(pattern.order_key(chunk.max().clone()), chunk);
            map
        } else {
            chunks_from_records(&namespace, &pattern, records)
        };

        let mut range_index = ChunkRangeIndex::new(&pattern);
        range_index.reload_all(&chunks).context(RangeIndexSnafu)?;

        Ok(Self {
            namespace,
            pattern,
            unique,
            config,
            state: RwLock::new(ManagerState { chunks, range_index }),
            sequence_number: AtomicU64::new(next_sequence()),
            metrics: ManagerMetrics::new(registry),
            backend,
            store,
            cluster_lock,
            picker,
        })
    }

    pub fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }

    pub fn pattern(&self) -> &ShardKeyPattern {
        &self.pattern
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number.load(Ordering::Acquire)
    }

    fn bump_sequence(&self) {
        self.sequence_number.store(next_sequence(), Ordering::Release);
    }

    /// Highest version across every chunk of this namespace (§4.3
    /// `get_version()`).
    pub fn version(&self) -> ChunkVersion {
        let state = self.state.read();
        state
            .chunks
            .values()
            .map(Chunk::version)
            .max()
            .unwrap_or(ChunkVersion::ZERO)
    }

    /// Highest version among chunks currently on `shard` (§4.3
    /// `get_version(shard)`).
    pub fn version_for_shard(&self, shard: &ShardId) -> ChunkVersion {
        let state = self.state.read();
        state
            .chunks
            .values()
            .filter(|c| c.shard() == shard)
            .map(Chunk::version)
            .max()
            .unwrap_or(ChunkVersion::ZERO)
    }

    /// Every shard currently holding at least one chunk of this namespace.
    pub fn all_shards(&self) -> HashSet<ShardId> {
        let state = self.state.read();
        state.chunks.values().map(|c| c.shard().clone()).collect()
    }

    /// `find_chunk` (§4.3): route a document key to its owning chunk,
    /// reloading once on a miss before giving up.
    pub fn find_chunk(&self, key: &ShardKey) -> Result<Chunk> {
        if let Some(chunk) = self.try_find_chunk(key) {
            return Ok(chunk);
        }
        self.reload()?;
        self.try_find_chunk(key)
            .context(RoutingInconsistencySnafu { key: key.clone() })
    }

    fn try_find_chunk(&self, key: &ShardKey) -> Option<Chunk> {
        let state = self.state.read();
        let probe = self.pattern.order_key(key.clone());
        let (_, chunk) = state
            .chunks
            .range((std::ops::Bound::Excluded(probe), std::ops::Bound::Unbounded))
            .next()?;
        chunk.contains(key, &self.pattern).then(|| chunk.clone())
    }

    /// Reload the whole chunk map and range index from the metadata store
    /// (§4.3 "fall back to a fresh load from the store").
    pub fn reload(&self) -> Result<()> {
        let records = self.store.load(&self.namespace).context(StoreSnafu)?;
        let chunks = chunks_from_records(&self.namespace, &self.pattern, records);
        let mut range_index = ChunkRangeIndex::new(&self.pattern);
        range_index.reload_all(&chunks).context(RangeIndexSnafu)?;

        let mut state = self.state.write();
        *state = ManagerState { chunks, range_index };
        drop(state);

        self.bump_sequence();
        self.metrics.reloads.inc(1);
        Ok(())
    }

    /// `chunks_for_query` (§4.3): compile a predicate down to the coalesced
    /// ranges it can possibly touch, restricted (like the rest of this
    /// planner) to the shard key's first field.
    pub fn chunks_for_query(&self, predicate: &Predicate) -> Result<QueryPlan> {
        if let Some(reason) = predicate.unsupported_reason() {
            return Err(ManagerError::Unsupported { reason });
        }

        let field = self.pattern.first_field_name();
        let state = self.state.read();

        if let Some(value) = predicate.equality_for(field) {
            let probe = extend_key(&self.pattern, value.clone(), KeyValue::MinKey);
            return Ok(match state.range_index.range_covering(&probe) {
                Some(range) => QueryPlan::Ranges(vec![Arc::clone(range)]),
                None => QueryPlan::Empty,
            });
        }

        if let Some(range) = predicate.range_for(field) {
            if range.is_trivial() {
                return Ok(QueryPlan::All);
            }
            if is_empty_range(range) {
                return Ok(QueryPlan::Empty);
            }
            let mut matched: Vec<ChunkRangeRef> = state
                .range_index
                .ranges()
                .filter(|r| overlaps(r.as_ref(), range))
                .cloned()
                .collect();
            matched.sort_by(|a, b| self.pattern.compare(a.min(), b.min()));
            return Ok(QueryPlan::Ranges(matched));
        }

        Ok(QueryPlan::All)
    }

    /// `shards_for_query` (§4.3): the set of shards a query's predicate can
    /// possibly need to visit.
    pub fn shards_for_query(&self, predicate: &Predicate) -> Result<HashSet<ShardId>> {
        Ok(match self.chunks_for_query(predicate)? {
            QueryPlan::Empty => HashSet::new(),
            QueryPlan::All => self.all_shards(),
            QueryPlan::Ranges(ranges) => ranges.iter().map(|r| r.shard().clone()).collect(),
        })
    }

    /// `save` (§4.3): persist every modified chunk, re-index the shards
    /// touched, and bump `sequence_number`.
    ///
    /// The distilled spec lists `save` among the read-locked operations,
    /// reasoning that only each chunk's own mutable fields change. This
    /// implementation stores chunks as plain owned values in the map rather
    /// than behind per-chunk interior mutability, so persisting one here
    /// takes the manager's write lock instead -- see `DESIGN.md`.
    pub fn save(&self) -> Result<()> {
        let mut state = self.state.write();
        let mut shards_touched = HashSet::new();

        for chunk in state.chunks.values_mut() {
            if !chunk.modified() {
                continue;
            }

            let was_new = chunk.version().is_zero();
            let id = chunk
                .id()
                .map(str::to_string)
                .unwrap_or_else(|| Chunk::gen_id(&self.namespace, &self.pattern, chunk.min()));
            let record = PersistedChunk {
                id: id.clone(),
                version: chunk.version(),
                ns: self.namespace.clone(),
                min: chunk.min().clone(),
                max: chunk.max().clone(),
                shard: chunk.shard().clone(),
            };

            let new_version = self.store.save(&record).context(StoreSnafu)?;
            chunk.set_version(new_version);
            chunk.set_id(id.clone());
            chunk.mark_unmodified();
            shards_touched.insert(chunk.shard().clone());

            if was_new {
                let reloaded = self
                    .store
                    .load_by_id(&id)
                    .context(StoreSnafu)?
                    .context(SaveRoundTripMismatchSnafu { id: id.clone() })?;
                if reloaded.ns != self.namespace
                    || &reloaded.min != chunk.min()
                    || &reloaded.max != chunk.max()
                    || &reloaded.shard != chunk.shard()
                {
                    return Err(ManagerError::SaveRoundTripMismatch { id });
                }
            }
        }
        drop(state);

        self.bump_sequence();
        for shard in &shards_touched {
            self.backend
                .ensure_index(shard, &self.namespace, &self.pattern)
                .context(BackendSnafu)?;
        }
        Ok(())
    }

    /// `split` (§4.1 `split_if_should` / §4.3): split the chunk currently
    /// keyed by `old_max` at `m`, persist both halves, then evaluate the
    /// automove heuristic on the pair.
    pub fn split(&self, old_max: &ShardKey, m: ShardKey) -> Result<()> {
        let (left, right) = {
            let mut state = self.state.write();
            let old_max_key = self.pattern.order_key(old_max.clone());
            let chunk = state
                .chunks
                .get(&old_max_key)
                .cloned()
                .context(ChunkNotFoundSnafu { chunk_max: old_max.clone() })?;

            let _guard = self
                .cluster_lock
                .lock_namespace_on_server(chunk.shard(), &self.namespace)
                .context(LockSnafu)?;

            let (left, right) = chunk.split_at(m, &self.pattern).context(SplitSnafu)?;

            state.chunks.remove(&old_max_key);
            state.chunks.insert(self.pattern.order_key(left.max().clone()), left.clone());
            state.chunks.insert(self.pattern.order_key(right.max().clone()), right.clone());
            state
                .range_index
                .reload_range(&state.chunks, left.min(), right.max())
                .context(RangeIndexSnafu)?;
            (left, right)
        };

        self.save()?;
        info!(ns = %self.namespace, min = ?left.min(), split_at = ?right.min(), max = ?right.max(), "split chunk");
        self.metrics.splits.inc(1);

        self.move_if_should(left.max(), right.max())
    }

    /// `move_if_should` (§4.1): decide, and if warranted act on, the
    /// automove heuristic for a chunk pair freshly produced by a split.
    fn move_if_should(&self, original_max: &ShardKey, new_max: &ShardKey) -> Result<()> {
        let (original, new) = {
            let state = self.state.read();
            let original = state
                .chunks
                .get(&self.pattern.order_key(original_max.clone()))
                .cloned()
                .context(ChunkNotFoundSnafu { chunk_max: original_max.clone() })?;
            let new = state
                .chunks
                .get(&self.pattern.order_key(new_max.clone()))
                .cloned()
                .context(ChunkNotFoundSnafu { chunk_max: new_max.clone() })?;
            (original, new)
        };

        let decision = original
            .should_automove(&new, self.backend.as_ref(), &self.pattern, self.picker.as_ref())
            .context(SplitSnafu)?;

        match decision {
            AutomoveDecision::NoMove => Ok(()),
            AutomoveDecision::MoveNew(dest) => self.migrate(new_max, dest),
            AutomoveDecision::MoveSelf(dest) => self.migrate(original_max, dest),
        }
    }

    /// `maybe_autosplit` (§4.1 `split_if_should`): record `bytes_written`
    /// against the chunk keyed by `chunk_max` and split it if the
    /// accumulated traffic crosses the threshold. Entry is gated by the
    /// process-wide split lock (§5); a contended caller is told so and
    /// does nothing, rather than blocking.
    pub fn maybe_autosplit(&self, chunk_max: &ShardKey, bytes_written: u64) -> Result<bool> {
        let Some(_guard) = process_split_lock().try_lock() else {
            self.metrics.split_lock_contended.inc(1);
            return Ok(false);
        };

        let decision = {
            let mut state = self.state.write();
            let probe = self.pattern.order_key(chunk_max.clone());
            let Some(chunk) = state.chunks.get_mut(&probe) else {
                return Ok(false);
            };
            chunk
                .should_autosplit(
                    bytes_written,
                    self.config.max_chunk_size_bytes,
                    &self.pattern,
                    self.backend.as_ref(),
                )
                .context(SplitSnafu)?
        };

        match decision {
            AutosplitDecision::NoSplit => Ok(false),
            AutosplitDecision::SplitAt(m) => {
                self.split(chunk_max, m)?;
                Ok(true)
            }
        }
    }

    /// `move_and_commit` (§4.1, §6): migrate the chunk keyed by `chunk_max`
    /// to `to`, implementing the donor-version bump (including the
    /// "bump another chunk" trick when this is the last chunk leaving the
    /// donor) described in §9.
    pub fn migrate(&self, chunk_max: &ShardKey, to: ShardId) -> Result<()> {
        let (from, min, max) = {
            let state = self.state.read();
            let chunk = state
                .chunks
                .get(&self.pattern.order_key(chunk_max.clone()))
                .context(ChunkNotFoundSnafu { chunk_max: chunk_max.clone() })?;
            (chunk.shard().clone(), chunk.min().clone(), chunk.max().clone())
        };

        let token = self
            .backend
            .movechunk_start(&from, &to, &self.namespace, &min, &max)
            .context(BackendSnafu)?;

        let old_source_version = self.version_for_shard(&from);

        {
            let mut state = self.state.write();
            let chunk_max_key = self.pattern.order_key(chunk_max.clone());
            let chunk = state
                .chunks
                .get(&chunk_max_key)
                .cloned()
                .context(ChunkNotFoundSnafu { chunk_max: chunk_max.clone() })?;
            let migrated = chunk.migrated_to(to.clone()).context(MigrateSnafu)?;

            // §9: if this was the last chunk on `from`, there is nothing
            // left there to carry a version bump -- mark any one surviving
            // chunk on `from` modified so `save` assigns it a fresh,
            // strictly-greater version instead.
            let another_on_from = state
                .chunks
                .iter()
                .find(|(k, c)| c.shard() == &from && k.key() != chunk_max)
                .map(|(k, _)| k.clone());

            state.chunks.insert(chunk_max_key, migrated.clone());
            if let Some(key) = another_on_from {
                if let Some(other) = state.chunks.get_mut(&key) {
                    other.mark_modified();
                }
            }

            state
                .range_index
                .reload_range(&state.chunks, migrated.min(), migrated.max())
                .context(RangeIndexSnafu)?;
        }

        self.save()?;

        let mut new_source_version = self.version_for_shard(&from);
        if new_source_version.is_zero() {
            // No chunk remains on `from` at all: the store is the
            // authority for what `from` should now believe, so tell it
            // directly rather than inventing a version locally.
            new_source_version = old_source_version.next();
            self.store
                .set_shard_version(&from, &self.namespace, new_source_version, true)
                .context(StoreSnafu)?;
        } else if new_source_version <= old_source_version {
            return Err(ManagerError::VersionRegressed {
                shard: from.to_string(),
                old: old_source_version,
                new: new_source_version,
            });
        }

        self.backend
            .movechunk_finish(&from, &to, &self.namespace, new_source_version, &token)
            .context(BackendSnafu)?;

        info!(ns = %self.namespace, from = %from, to = %to, min = ?min, max = ?max, "migrated chunk");
        self.metrics.migrations.inc(1);
        Ok(())
    }

    /// `drop` (§4.3): lock every shard holding this namespace, clear its
    /// collections and metadata. There is no rollback path if a later
    /// step fails after an earlier shard has already been dropped -- the
    /// distilled spec leaves this an explicit open design point (§9) and
    /// this implementation does not attempt to paper over it.
    pub fn drop_namespace(&self) -> Result<()> {
        let mut state = self.state.write();
        let shards: HashSet<ShardId> = state.chunks.values().map(|c| c.shard().clone()).collect();

        let mut guards = Vec::with_capacity(shards.len());
        for shard in &shards {
            guards.push(
                self.cluster_lock
                    .lock_namespace_on_server(shard, &self.namespace)
                    .context(LockSnafu)?,
            );
        }

        state.chunks.clear();
        state.range_index = ChunkRangeIndex::new(&self.pattern);
        drop(state);
        drop(guards);

        for shard in &shards {
            self.backend.drop_collection(shard, &self.namespace).context(BackendSnafu)?;
        }
        self.store.remove(&self.namespace).context(StoreSnafu)?;
        for shard in &shards {
            self.store
                .set_shard_version(shard, &self.namespace, ChunkVersion::ZERO, true)
                .context(StoreSnafu)?;
        }

        self.bump_sequence();
        Ok(())
    }
}

fn chunks_from_records(
    ns: &NamespaceName,
    pattern: &ShardKeyPattern,
    records: Vec<PersistedChunk>,
) -> BTreeMap<OrderedShardKey, Chunk> {
    records
        .into_iter()
        .map(|r| {
            let chunk = Chunk::from_persisted(ns.clone(), r.min, r.max, r.shard, r.version, r.id);
            (pattern.order_key(chunk.max().clone()), chunk)
        })
        .collect()
}

/// Build a probe key with `first` in the pattern's first field and `filler`
/// (`MinKey` or `MaxKey`) in every other field, the same extension the real
/// chunk map implicitly does when a query only constrains a prefix of a
/// compound shard key.
fn extend_key(pattern: &ShardKeyPattern, first: KeyValue, filler: KeyValue) -> ShardKey {
    let mut values = Vec::with_capacity(pattern.fields().len());
    values.push(first);
    for _ in 1..pattern.fields().len() {
        values.push(filler.clone());
    }
    ShardKey::new(values)
}

fn is_empty_range(range: &crate::predicate::FieldRange) -> bool {
    match (&range.lower, &range.upper) {
        (Bound::Inclusive(a), Bound::Inclusive(b)) => a > b,
        (Bound::Inclusive(a), Bound::Exclusive(b))
        | (Bound::Exclusive(a), Bound::Inclusive(b))
        | (Bound::Exclusive(a), Bound::Exclusive(b)) => a >= b,
        _ => false,
    }
}

/// Whether a coalesced range's first-field span can contain any value the
/// field range allows. Whole-range granularity means bound inclusivity
/// doesn't change which ranges qualify (a range spanning many values
/// overlaps `>v` exactly when it overlaps `>=v`); only the emptiness check
/// above needs to distinguish them.
fn overlaps(range: &crate::chunk_range::ChunkRange, field_range: &crate::predicate::FieldRange) -> bool {
    let range_lo = range.min().first_field();
    let range_hi = range.max().first_field();

    let after_lower = match &field_range.lower {
        Bound::Unbounded => true,
        Bound::Inclusive(v) | Bound::Exclusive(v) => range_hi > v,
    };
    let before_upper = match &field_range.upper {
        Bound::Unbounded => true,
        Bound::Inclusive(v) | Bound::Exclusive(v) => range_lo <= v,
    };
    after_lower && before_upper
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{FakeBackend, FakeClusterLock, FakeStore, FixedPicker};

    fn pattern() -> ShardKeyPattern {
        ShardKeyPattern::single("a")
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

    /// Bootstrap a manager plus a handle to its backend, so tests can
    /// configure object counts before triggering a split (the automove
    /// heuristic treats an unconfigured, zero-count chunk as "still
    /// basically empty" and will move it on its own otherwise).
    fn manager_with(primary: &str, picker_dest: &str) -> (ChunkManager, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::default());
        let manager = ChunkManager::bootstrap(
            ns(),
            pattern(),
            false,
            shard(primary),
            ChunkManagerConfig::default(),
            backend.clone(),
            Arc::new(FakeStore::default()),
            Arc::new(FakeClusterLock),
            Arc::new(FixedPicker(shard(picker_dest))),
            &Registry::new(),
        )
        .unwrap();
        (manager, backend)
    }

    /// Configure both halves of a split at `m` as non-trivially populated,
    /// so `should_automove` settles on `NoMove` and a test can drive
    /// migration manually.
    fn suppress_automove(backend: &FakeBackend, m: &ShardKey) {
        backend.set_object_count(&pattern().global_min(), m, 5);
        backend.set_object_count(m, &pattern().global_max(), 5);
    }

    #[test]
    fn bootstrap_creates_one_global_chunk() {
        let (manager, _backend) = manager_with("S0", "S1");
        let chunk = manager.find_chunk(&int(42)).unwrap();
        assert_eq!(chunk.shard(), &shard("S0"));
        assert_eq!(chunk.min(), &pattern().global_min());
        assert_eq!(chunk.max(), &pattern().global_max());
    }

    #[test]
    fn split_produces_two_routable_chunks() {
        let (manager, backend) = manager_with("S0", "S1");
        let old_max = pattern().global_max();
        suppress_automove(&backend, &int(50));

        manager.split(&old_max, int(50)).unwrap();

        let left = manager.find_chunk(&int(10)).unwrap();
        let right = manager.find_chunk(&int(90)).unwrap();
        assert_eq!(left.max(), &int(50));
        assert_eq!(right.min(), &int(50));
        assert_eq!(left.shard(), &shard("S0"));
        assert_eq!(right.shard(), &shard("S0"));
    }

    #[test]
    fn split_triggers_automove_for_a_near_empty_new_chunk() {
        let (manager, _backend) = manager_with("S0", "S1");
        let old_max = pattern().global_max();

        // Default, unconfigured object counts are 0 on both halves, so the
        // automove heuristic fires for the freshly split-off chunk.
        manager.split(&old_max, int(50)).unwrap();

        let right = manager.find_chunk(&int(90)).unwrap();
        assert_eq!(right.shard(), &shard("S1"));
    }

    #[test]
    fn migrate_changes_routing_and_bumps_donor_version() {
        let (manager, backend) = manager_with("S0", "S1");
        let old_max = pattern().global_max();
        suppress_automove(&backend, &int(50));
        manager.split(&old_max, int(50)).unwrap();

        // Migrate the right half; the left half stays on S0 and carries
        // the donor's version bump (§9's "bump another chunk" trick).
        let before = manager.version_for_shard(&shard("S0"));
        manager.migrate(&pattern().global_max(), shard("S1")).unwrap();

        let moved = manager.find_chunk(&int(90)).unwrap();
        let stayed = manager.find_chunk(&int(10)).unwrap();
        assert_eq!(moved.shard(), &shard("S1"));
        assert_eq!(stayed.shard(), &shard("S0"));
        assert!(manager.version_for_shard(&shard("S0")) > before);
    }

    #[test]
    fn shards_for_query_narrows_on_equality() {
        let (manager, backend) = manager_with("S0", "S1");
        let old_max = pattern().global_max();
        suppress_automove(&backend, &int(50));
        manager.split(&old_max, int(50)).unwrap();
        manager.migrate(&pattern().global_max(), shard("S1")).unwrap();

        let predicate = Predicate::new().with_equals("a", KeyValue::Int(10));
        let shards = manager.shards_for_query(&predicate).unwrap();
        assert_eq!(shards, HashSet::from([shard("S0")]));
    }

    #[test]
    fn shards_for_query_is_all_shards_with_no_constraint() {
        let (manager, backend) = manager_with("S0", "S1");
        let old_max = pattern().global_max();
        suppress_automove(&backend, &int(50));
        manager.split(&old_max, int(50)).unwrap();
        manager.migrate(&pattern().global_max(), shard("S1")).unwrap();

        let shards = manager.shards_for_query(&Predicate::new()).unwrap();
        assert_eq!(shards, HashSet::from([shard("S0"), shard("S1")]));
    }

    #[test]
    fn drop_namespace_clears_chunk_map() {
        let (manager, _backend) = manager_with("S0", "S1");
        manager.drop_namespace().unwrap();
        assert!(manager.find_chunk(&int(0)).is_err());
    }

    /// A plain `ShardKey::Ord`-keyed chunk map would physically sort chunks
    /// by ascending raw value regardless of the pattern's direction,
    /// desynchronizing `find_chunk`'s upper-bound lookup from a descending
    /// field's actual routing order. Exercise that case end to end through
    /// `ChunkManager`, not just the isolated `data_types`-level compare.
    ///
    /// Seeds the store directly with a three-chunk chain over finite
    /// boundaries (100 -> 50 -> 20 -> 5) rather than bootstrapping +
    /// splitting from `[global_min, global_max)`, since a descending
    /// direction's interaction with the `MinKey`/`MaxKey` sentinels is a
    /// separate, pre-existing question this fix does not touch.
    #[test]
    fn find_chunk_routes_correctly_with_a_descending_pattern() {
        use data_types::Direction;

        let pattern = ShardKeyPattern::new(vec![("a".into(), Direction::Descending)]);
        let store = Arc::new(FakeStore::default());
        for (id, min, max, s) in [
            ("c1", int(100), int(50), "S0"),
            ("c2", int(50), int(20), "S1"),
            ("c3", int(20), int(5), "S2"),
        ] {
            store
                .save(&PersistedChunk {
                    id: id.to_string(),
                    version: ChunkVersion::ZERO,
                    ns: ns(),
                    min,
                    max,
                    shard: shard(s),
                })
                .unwrap();
        }

        let backend = Arc::new(FakeBackend::default());
        let manager = ChunkManager::bootstrap(
            ns(),
            pattern.clone(),
            false,
            shard("S0"),
            ChunkManagerConfig::default(),
            backend,
            store,
            Arc::new(FakeClusterLock),
            Arc::new(FixedPicker(shard("S1"))),
            &Registry::new(),
        )
        .unwrap();

        // A `ShardKey::Ord`-ordered map would see this chain as c3 < c2 <
        // c1 (ascending raw order) and route every lookup to the wrong
        // chunk; the pattern-aware map must route by the chain's own
        // ascending (pattern) order instead.
        for (v, expected_shard) in [(60, "S0"), (30, "S1"), (10, "S2")] {
            let key = int(v);
            let chunk = manager
                .find_chunk(&key)
                .unwrap_or_else(|e| panic!("find_chunk({v}) failed: {e}"));
            assert!(
                chunk.contains(&key, &pattern),
                "chunk {:?}..{:?} does not contain key {v}",
                chunk.min(),
                chunk.max()
            );
            assert_eq!(chunk.shard(), &shard(expected_shard), "key {v} routed to the wrong shard");
        }
    }
}
