//! End-to-end scenarios against `ChunkManager` over the in-memory fakes,
//! one per walkthrough in the distilled spec: bootstrap, split at a chosen
//! point, automove of a freshly split chunk, migrate with the donor's
//! version bump, equality-narrowed routing, and split refusal on a
//! single-point chunk. Colocated unit tests in `manager.rs` already cover
//! the same surface at a finer grain; these drive the whole manager the
//! way an embedder would, through its public API only.

use std::sync::Arc;

use chunk_catalog::collaborators::fakes::{FakeBackend, FakeClusterLock, FakeStore, FixedPicker};
use chunk_catalog::{ChunkManager, ChunkManagerConfig, Predicate};
use data_types::{KeyValue, NamespaceName, ShardId, ShardKey, ShardKeyPattern};
use metric::Registry;

fn pattern() -> ShardKeyPattern {
    ShardKeyPattern::single("a")
}

fn ns() -> NamespaceName {
    NamespaceName::new("sales.orders").unwrap()
}

fn shard(name: &str) -> ShardId {
    ShardId::new(name).unwrap()
}

fn int(v: i64) -> ShardKey {
    ShardKey::new(vec![KeyValue::Int(v)])
}

fn manager_on(primary: &str, picker_dest: &str) -> (ChunkManager, Arc<FakeBackend>) {
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

/// Configure both halves of a split at `m` as non-trivially populated, so
/// the automove heuristic settles on "don't move" and a test can drive
/// migration by hand.
fn suppress_automove(backend: &FakeBackend, m: &ShardKey) {
    backend.set_object_count(&pattern().global_min(), m, 5);
    backend.set_object_count(m, &pattern().global_max(), 5);
}

#[test]
fn a_fresh_namespace_bootstraps_one_global_chunk_on_its_primary_shard() {
    let (manager, _backend) = manager_on("S0", "S1");

    assert_eq!(manager.all_shards(), std::collections::HashSet::from([shard("S0")]));

    let chunk = manager.find_chunk(&int(0)).unwrap();
    assert_eq!(chunk.min(), &pattern().global_min());
    assert_eq!(chunk.max(), &pattern().global_max());
    assert_eq!(chunk.shard(), &shard("S0"));
}

#[test]
fn splitting_at_a_chosen_point_produces_two_independently_routable_chunks() {
    let (manager, backend) = manager_on("S0", "S1");
    let old_max = pattern().global_max();
    suppress_automove(&backend, &int(100));

    manager.split(&old_max, int(100)).unwrap();

    let below = manager.find_chunk(&int(50)).unwrap();
    let above = manager.find_chunk(&int(150)).unwrap();
    assert_eq!(below.max(), &int(100));
    assert_eq!(above.min(), &int(100));
    assert_eq!(manager.all_shards(), std::collections::HashSet::from([shard("S0")]));
}

#[test]
fn splitting_off_a_still_empty_chunk_moves_it_to_the_picked_shard() {
    let (manager, _backend) = manager_on("S0", "S1");
    let old_max = pattern().global_max();

    // No object counts configured anywhere: both halves look empty, and
    // the automove heuristic relocates the freshly split-off chunk.
    manager.split(&old_max, int(100)).unwrap();

    let moved = manager.find_chunk(&int(150)).unwrap();
    assert_eq!(moved.shard(), &shard("S1"));
}

#[test]
fn migrating_a_chunk_updates_routing_and_bumps_the_donor_shards_version() {
    let (manager, backend) = manager_on("S0", "S1");
    let old_max = pattern().global_max();
    suppress_automove(&backend, &int(100));
    manager.split(&old_max, int(100)).unwrap();

    let donor_version_before = manager.version_for_shard(&shard("S0"));
    manager.migrate(&pattern().global_max(), shard("S1")).unwrap();

    let moved = manager.find_chunk(&int(150)).unwrap();
    let stayed = manager.find_chunk(&int(50)).unwrap();
    assert_eq!(moved.shard(), &shard("S1"));
    assert_eq!(stayed.shard(), &shard("S0"));
    assert!(manager.version_for_shard(&shard("S0")) > donor_version_before);
    assert_eq!(manager.all_shards(), std::collections::HashSet::from([shard("S0"), shard("S1")]));
}

#[test]
fn migrating_both_neighboring_chunks_to_the_same_shard_coalesces_their_range() {
    let (manager, backend) = manager_on("S0", "S1");
    suppress_automove(&backend, &int(100));
    manager.split(&pattern().global_max(), int(100)).unwrap();

    manager.migrate(&int(100), shard("S1")).unwrap();
    manager.migrate(&pattern().global_max(), shard("S1")).unwrap();

    // Both chunks now share a shard; an unconstrained query should only
    // need to contact S1.
    let shards = manager.shards_for_query(&Predicate::new()).unwrap();
    assert_eq!(shards, std::collections::HashSet::from([shard("S1")]));
}

#[test]
fn equality_predicate_narrows_routing_to_a_single_shard() {
    let (manager, backend) = manager_on("S0", "S1");
    suppress_automove(&backend, &int(100));
    manager.split(&pattern().global_max(), int(100)).unwrap();
    manager.migrate(&pattern().global_max(), shard("S1")).unwrap();

    let low = Predicate::new().with_equals("a", KeyValue::Int(50));
    let high = Predicate::new().with_equals("a", KeyValue::Int(150));

    assert_eq!(manager.shards_for_query(&low).unwrap(), std::collections::HashSet::from([shard("S0")]));
    assert_eq!(manager.shards_for_query(&high).unwrap(), std::collections::HashSet::from([shard("S1")]));
}

#[test]
fn an_unconstrained_query_must_contact_every_shard() {
    let (manager, backend) = manager_on("S0", "S1");
    suppress_automove(&backend, &int(100));
    manager.split(&pattern().global_max(), int(100)).unwrap();
    manager.migrate(&pattern().global_max(), shard("S1")).unwrap();

    let shards = manager.shards_for_query(&Predicate::new()).unwrap();
    assert_eq!(shards, std::collections::HashSet::from([shard("S0"), shard("S1")]));
}

#[test]
fn splitting_a_single_point_chunk_at_its_own_boundary_is_refused() {
    let (manager, _backend) = manager_on("S0", "S1");
    let old_max = pattern().global_max();

    // A split point equal to either existing boundary is not a valid cut.
    assert!(manager.split(&old_max, pattern().global_min()).is_err());
    assert!(manager.split(&old_max, pattern().global_max()).is_err());

    // The chunk map is unchanged: still exactly one chunk spanning the
    // whole key range.
    let chunk = manager.find_chunk(&int(0)).unwrap();
    assert_eq!(chunk.min(), &pattern().global_min());
    assert_eq!(chunk.max(), &pattern().global_max());
}

#[test]
fn dropping_a_namespace_clears_its_chunk_map_and_backend_state() {
    let (manager, backend) = manager_on("S0", "S1");
    suppress_automove(&backend, &int(100));
    manager.split(&pattern().global_max(), int(100)).unwrap();

    manager.drop_namespace().unwrap();

    assert!(manager.find_chunk(&int(0)).is_err());
    assert!(manager.all_shards().is_empty());
}
