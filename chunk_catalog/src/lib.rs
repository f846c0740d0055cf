//! Chunk metadata manager for one horizontally-sharded namespace: the
//! chunk map, a coalesced range index over it for routing, and the
//! orchestration of split, migrate, query planning and drop against a set
//! of external collaborators (a shard wire driver, a metadata store, a
//! cluster lock service, a rebalancer).
//!
//! `Chunk`/`ChunkRange` are plain values; `ChunkManager` is the only type
//! that owns a namespace's lock, map and range index (see the module doc
//! on [`chunk`] for why, and `DESIGN.md` for the longer write-up).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod chunk;
pub mod chunk_range;
pub mod chunk_range_index;
pub mod collaborators;
pub mod fixed_hash_table;
pub mod manager;
pub mod predicate;

pub use chunk::{AutomoveDecision, AutosplitDecision, Chunk, ChunkError};
pub use chunk_range::{ChunkRange, ChunkRangeError, ChunkRangeRef};
pub use chunk_range_index::{ChunkRangeIndex, RangeIndexError};
pub use fixed_hash_table::{FixedHashTable, PutOutcome, Slot, TableKey};
pub use manager::{ChunkManager, ChunkManagerConfig, ManagerError, QueryPlan};
pub use predicate::{Bound, FieldRange, Predicate};
