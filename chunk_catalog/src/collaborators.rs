//! Traits at the seam to every system this crate treats as external (§1,
//! §6, §10.5): the wire driver to backend shards, the cluster metadata
//! store, and the cluster lock service. Grounded on the teacher's
//! `NamespaceCache` (`router/src/namespace_cache.rs`) and
//! `IngesterPartitionInfo`/`ParquetFileInfo` (
//! `querier/src/table/state_reconciler/interface.rs`): define the
//! collaborator as a small trait, keep a real implementation out of this
//! crate, and provide an in-memory fake for tests.

use std::fmt::Debug;

use data_types::{ChunkVersion, NamespaceName, ShardId, ShardKey, ShardKeyPattern};
use snafu::Snafu;

/// Opaque token returned by `movechunk.start` and threaded through to
/// `movechunk.finish` (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishToken(pub String);

/// One persisted chunk record, matching the `config.chunks` shape of §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedChunk {
    pub id: String,
    pub version: ChunkVersion,
    pub ns: NamespaceName,
    pub min: ShardKey,
    pub max: ShardKey,
    pub shard: ShardId,
}

/// Failures from a backend shard call (§7, "external failure").
#[derive(Debug, Snafu)]
pub enum BackendError {
    #[snafu(display("backend command failed on shard {shard}: {message}"))]
    CommandFailed { shard: String, message: String },
}

/// The wire driver to backend shards: `run_command`, `query`, `count`,
/// `ensure_index`, `drop_collection` of §1, specialized to the specific
/// commands this crate issues (§6).
pub trait ShardBackend: Debug + Send + Sync {
    /// `median_key {ns, keyPattern, min, max} -> {median}`.
    fn median_key(
        &self,
        shard: &ShardId,
        ns: &NamespaceName,
        pattern: &ShardKeyPattern,
        min: &ShardKey,
        max: &ShardKey,
    ) -> Result<ShardKey, BackendError>;

    /// First document in `[min, max)` ordered by shard key, or in reverse
    /// order if `reverse` is set. Used by `pick_split_point` (§4.1) to bias
    /// away from an unbounded end, and by the "median equals min" skew
    /// fallback to find the next document past `min`.
    fn first_document(
        &self,
        shard: &ShardId,
        ns: &NamespaceName,
        pattern: &ShardKeyPattern,
        min: &ShardKey,
        max: &ShardKey,
        reverse: bool,
    ) -> Result<Option<ShardKey>, BackendError>;

    /// `datasize {ns, keyPattern, min, max, maxSize} -> {size}`.
    fn datasize(
        &self,
        shard: &ShardId,
        ns: &NamespaceName,
        pattern: &ShardKeyPattern,
        min: &ShardKey,
        max: &ShardKey,
        max_size: u64,
    ) -> Result<u64, BackendError>;

    /// Number of documents owned by a chunk, used by the automove
    /// heuristic's `count_objects() <= 1` checks (§4.1).
    fn count_objects(
        &self,
        shard: &ShardId,
        ns: &NamespaceName,
        pattern: &ShardKeyPattern,
        min: &ShardKey,
        max: &ShardKey,
    ) -> Result<u64, BackendError>;

    /// `movechunk.start {ns, from, to, filter} -> {finishToken}`.
    fn movechunk_start(
        &self,
        from: &ShardId,
        to: &ShardId,
        ns: &NamespaceName,
        min: &ShardKey,
        max: &ShardKey,
    ) -> Result<FinishToken, BackendError>;

    /// `movechunk.finish {ns, to, newVersion, ...}`.
    fn movechunk_finish(
        &self,
        from: &ShardId,
        to: &ShardId,
        ns: &NamespaceName,
        new_version: ChunkVersion,
        token: &FinishToken,
    ) -> Result<(), BackendError>;

    /// Idempotent per-shard index creation.
    fn ensure_index(
        &self,
        shard: &ShardId,
        ns: &NamespaceName,
        pattern: &ShardKeyPattern,
    ) -> Result<(), BackendError>;

    /// Drops the collection on one shard, part of `ChunkManager::drop`.
    fn drop_collection(&self, shard: &ShardId, ns: &NamespaceName) -> Result<(), BackendError>;
}

/// Failures persisting to, or reading from, the cluster metadata store.
#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("metadata store unavailable: {message}"))]
    Unavailable { message: String },
}

/// The cluster metadata store: `load`, `save`, `remove`,
/// `set_shard_version` of §1 and §6.
pub trait MetadataStore: Debug + Send + Sync {
    /// Load all persisted chunk records for a namespace, or an empty vec if
    /// the namespace has never been sharded.
    fn load(&self, ns: &NamespaceName) -> Result<Vec<PersistedChunk>, StoreError>;

    /// Persist one chunk record, returning the server-assigned version.
    /// Mongo's real contract: the version only changes on write, and the
    /// store -- not the caller -- is authoritative for its value.
    fn save(&self, record: &PersistedChunk) -> Result<ChunkVersion, StoreError>;

    /// Load a single record by `_id`, used by `Chunk::save`'s round-trip
    /// check (§4.1).
    fn load_by_id(&self, id: &str) -> Result<Option<PersistedChunk>, StoreError>;

    /// Remove every chunk record for a namespace (§4.3 `drop`).
    fn remove(&self, ns: &NamespaceName) -> Result<(), StoreError>;

    /// `setShardVersion(ns, version, authoritative)` sent to one shard.
    fn set_shard_version(
        &self,
        shard: &ShardId,
        ns: &NamespaceName,
        version: ChunkVersion,
        authoritative: bool,
    ) -> Result<(), StoreError>;
}

/// Failure to obtain a cluster-wide namespace lock.
#[derive(Debug, Snafu)]
pub enum LockError {
    #[snafu(display("could not obtain namespace lock on shard {shard}"))]
    Unobtainable { shard: String },
}

/// RAII guard for one cluster-wide namespace lock. Releases on drop; the
/// concrete implementation (out of scope, §1) decides what that means on
/// the wire.
#[derive(Debug)]
pub struct LockGuard {
    _inner: Box<dyn Debug + Send>,
}

impl LockGuard {
    pub fn new(inner: impl Debug + Send + 'static) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// The cluster lock service: `lock_namespace_on_server`, `all_up` of §1.
pub trait ClusterLock: Debug + Send + Sync {
    fn lock_namespace_on_server(
        &self,
        shard: &ShardId,
        ns: &NamespaceName,
    ) -> Result<LockGuard, LockError>;
}

/// External rebalancer policy's entry point (`Shard::pick()`, §4.1): choose
/// a destination shard for an automove, excluding the chunk's current
/// shard. Returns `None` if there is nowhere better to put it.
pub trait ShardPicker: Debug + Send + Sync {
    fn pick(&self, exclude: &ShardId) -> Option<ShardId>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod fakes {
    //! In-memory fakes for the collaborator traits, used by this crate's
    //! own tests and, via the `test-utils` feature, by its `tests/`
    //! integration binaries -- the teacher inlines fakes alongside their
    //! callers rather than standing up a shared fakes crate for a
    //! single-crate concern (§10.5).

    use super::*;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicU64, Ordering},
            Mutex,
        },
    };

    /// A backend fake whose `median_key` answer is configured per call by
    /// the test, and which otherwise returns deterministic, cheap answers.
    #[derive(Debug, Default)]
    pub struct FakeBackend {
        pub median_answers: Mutex<HashMap<(String, String), ShardKey>>,
        pub first_document_answers: Mutex<HashMap<(String, String, bool), Option<ShardKey>>>,
        pub datasizes: Mutex<HashMap<String, u64>>,
        pub object_counts: Mutex<HashMap<String, u64>>,
        next_token: AtomicU64,
    }

    fn range_key(min: &ShardKey, max: &ShardKey) -> (String, String) {
        (format!("{min:?}"), format!("{max:?}"))
    }

    impl FakeBackend {
        pub fn set_median(&self, min: &ShardKey, max: &ShardKey, median: ShardKey) {
            self.median_answers
                .lock()
                .unwrap()
                .insert(range_key(min, max), median);
        }

        pub fn set_datasize(&self, min: &ShardKey, max: &ShardKey, size: u64) {
            self.datasizes
                .lock()
                .unwrap()
                .insert(format!("{:?}", range_key(min, max)), size);
        }

        pub fn set_object_count(&self, min: &ShardKey, max: &ShardKey, count: u64) {
            self.object_counts
                .lock()
                .unwrap()
                .insert(format!("{:?}", range_key(min, max)), count);
        }
    }

    impl ShardBackend for FakeBackend {
        fn median_key(
            &self,
            _shard: &ShardId,
            _ns: &NamespaceName,
            _pattern: &ShardKeyPattern,
            min: &ShardKey,
            max: &ShardKey,
        ) -> Result<ShardKey, BackendError> {
            self.median_answers
                .lock()
                .unwrap()
                .get(&range_key(min, max))
                .cloned()
                .ok_or(BackendError::CommandFailed {
                    shard: "fake".into(),
                    message: "no median configured for range".into(),
                })
        }

        fn first_document(
            &self,
            _shard: &ShardId,
            _ns: &NamespaceName,
            _pattern: &ShardKeyPattern,
            min: &ShardKey,
            max: &ShardKey,
            reverse: bool,
        ) -> Result<Option<ShardKey>, BackendError> {
            let (a, b) = range_key(min, max);
            Ok(self
                .first_document_answers
                .lock()
                .unwrap()
                .get(&(a, b, reverse))
                .cloned()
                .unwrap_or(None))
        }

        fn datasize(
            &self,
            _shard: &ShardId,
            _ns: &NamespaceName,
            _pattern: &ShardKeyPattern,
            min: &ShardKey,
            max: &ShardKey,
            max_size: u64,
        ) -> Result<u64, BackendError> {
            let size = self
                .datasizes
                .lock()
                .unwrap()
                .get(&format!("{:?}", range_key(min, max)))
                .copied()
                .unwrap_or(0);
            Ok(size.min(max_size))
        }

        fn count_objects(
            &self,
            _shard: &ShardId,
            _ns: &NamespaceName,
            _pattern: &ShardKeyPattern,
            min: &ShardKey,
            max: &ShardKey,
        ) -> Result<u64, BackendError> {
            Ok(self
                .object_counts
                .lock()
                .unwrap()
                .get(&format!("{:?}", range_key(min, max)))
                .copied()
                .unwrap_or(0))
        }

        fn movechunk_start(
            &self,
            _from: &ShardId,
            _to: &ShardId,
            _ns: &NamespaceName,
            _min: &ShardKey,
            _max: &ShardKey,
        ) -> Result<FinishToken, BackendError> {
            let n = self.next_token.fetch_add(1, Ordering::Relaxed);
            Ok(FinishToken(format!("token-{n}")))
        }

        fn movechunk_finish(
            &self,
            _from: &ShardId,
            _to: &ShardId,
            _ns: &NamespaceName,
            _new_version: ChunkVersion,
            _token: &FinishToken,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        fn ensure_index(
            &self,
            _shard: &ShardId,
            _ns: &NamespaceName,
            _pattern: &ShardKeyPattern,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        fn drop_collection(
            &self,
            _shard: &ShardId,
            _ns: &NamespaceName,
        ) -> Result<(), BackendError> {
            Ok(())
        }
    }

    /// An in-memory metadata store, versions assigned by a monotonic
    /// per-store counter (standing in for server-assigned timestamps).
    #[derive(Debug, Default)]
    pub struct FakeStore {
        records: Mutex<HashMap<String, PersistedChunk>>,
        next_version: AtomicU64,
    }

    impl MetadataStore for FakeStore {
        fn load(&self, ns: &NamespaceName) -> Result<Vec<PersistedChunk>, StoreError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| &r.ns == ns)
                .cloned()
                .collect())
        }

        fn save(&self, record: &PersistedChunk) -> Result<ChunkVersion, StoreError> {
            let version = ChunkVersion::new(self.next_version.fetch_add(1, Ordering::Relaxed) + 1);
            let mut stored = record.clone();
            stored.version = version;
            self.records.lock().unwrap().insert(stored.id.clone(), stored);
            Ok(version)
        }

        fn load_by_id(&self, id: &str) -> Result<Option<PersistedChunk>, StoreError> {
            Ok(self.records.lock().unwrap().get(id).cloned())
        }

        fn remove(&self, ns: &NamespaceName) -> Result<(), StoreError> {
            self.records.lock().unwrap().retain(|_, r| &r.ns != ns);
            Ok(())
        }

        fn set_shard_version(
            &self,
            _shard: &ShardId,
            _ns: &NamespaceName,
            _version: ChunkVersion,
            _authoritative: bool,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// A cluster lock fake that always succeeds.
    #[derive(Debug, Default)]
    pub struct FakeClusterLock;

    impl ClusterLock for FakeClusterLock {
        fn lock_namespace_on_server(
            &self,
            _shard: &ShardId,
            _ns: &NamespaceName,
        ) -> Result<LockGuard, LockError> {
            Ok(LockGuard::new("fake-lock"))
        }
    }

    /// A picker that always hands back a fixed destination shard.
    #[derive(Debug)]
    pub struct FixedPicker(pub ShardId);

    impl ShardPicker for FixedPicker {
        fn pick(&self, exclude: &ShardId) -> Option<ShardId> {
            if &self.0 == exclude {
                None
            } else {
                Some(self.0.clone())
            }
        }
    }
}
