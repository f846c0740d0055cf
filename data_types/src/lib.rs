//! Shared value types for the chunk metadata manager.
//!
//! Mirrors the role the teacher workspace's own `data_types` crate plays: a
//! dependency-light crate of small, `Copy`/`Clone`-friendly newtypes that
//! every other crate in the workspace builds on, so identity and ordering
//! rules live in exactly one place.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::{cmp::Ordering, fmt::Display, sync::Arc};

use snafu::Snafu;

/// Errors constructing [`NamespaceName`] / [`ShardId`] values.
#[derive(Debug, Snafu)]
pub enum ValidationError {
    #[snafu(display("name cannot be empty"))]
    Empty,
}

/// `"database.collection"` identifier for one sharded namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceName(Arc<str>);

impl NamespaceName {
    /// Validate and construct a [`NamespaceName`].
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::Empty);
        }
        Ok(Self(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NamespaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a backend shard (typically a replica set).
///
/// Equality and hashing are by name only, per §3 of the spec: the chunk
/// manager never looks inside a shard, it only compares identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardId(Arc<str>);

impl ShardId {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::Empty);
        }
        Ok(Self(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One field value within a shard key, or one of the two sentinels that
/// bound the key space from below/above.
///
/// Variant order below doubles as canonical cross-type order (`MinKey` is
/// the global minimum, `MaxKey` the global maximum, everything else sits
/// between in `Null < Bool < Int < Str` order) — this is BSON's canonical
/// type ordering pared down to the value kinds this crate needs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    MinKey,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    MaxKey,
}

impl Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::MinKey => f.write_str("MinKey"),
            KeyValue::MaxKey => f.write_str("MaxKey"),
            KeyValue::Null => f.write_str("null"),
            KeyValue::Bool(b) => write!(f, "{b}"),
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// An ordered tuple of [`KeyValue`]s, one per field of the owning
/// [`ShardKeyPattern`][crate::ShardKeyPattern], in pattern field order.
///
/// `ShardKey` itself only carries values; whether a field sorts ascending
/// or descending is a property of the pattern, not of the key, so
/// `ShardKey`'s own `Ord` impl is the plain ascending lexicographic order
/// over its fields. Callers that need direction-aware comparison go through
/// `ShardKeyPattern::compare`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKey(pub Vec<KeyValue>);

impl ShardKey {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    /// The value of the first field, used by the first-field-only query
    /// planner (§9, compound shard-key query planning is an open question).
    pub fn first_field(&self) -> &KeyValue {
        &self.0[0]
    }
}

impl PartialOrd for ShardKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ShardKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// A [`ShardKey`] paired with the per-field [`Direction`]s of the pattern it
/// was built from.
///
/// `BTreeMap`'s `Ord` bound has no way to thread a pattern through every
/// comparison, so any map that needs direction-aware ordering (the chunk
/// map, the coalesced range index) has to carry that context on the key
/// itself rather than rely on `ShardKey`'s own direction-blind `Ord`.
/// Constructed via [`ShardKeyPattern::order_key`].
#[derive(Debug, Clone)]
pub struct OrderedShardKey {
    key: ShardKey,
    directions: Arc<[Direction]>,
}

impl OrderedShardKey {
    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    pub fn into_key(self) -> ShardKey {
        self.key
    }
}

impl PartialEq for OrderedShardKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for OrderedShardKey {}

impl PartialOrd for OrderedShardKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedShardKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (i, dir) in self.directions.iter().enumerate() {
            let ord = self.key.0[i].cmp(&other.key.0[i]);
            let ord = match dir {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Direction a shard-key field sorts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Ordered list of shard-key field names plus per-field [`Direction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardKeyPattern {
    fields: Vec<(String, Direction)>,
}

impl ShardKeyPattern {
    /// Construct a pattern. Panics if `fields` is empty: a shard key with no
    /// fields cannot be extracted or compared.
    pub fn new(fields: Vec<(String, Direction)>) -> Self {
        assert!(!fields.is_empty(), "shard key pattern must have >=1 field");
        Self { fields }
    }

    /// Single-ascending-field convenience constructor, the common case used
    /// throughout the tests and the bootstrap path.
    pub fn single(field: impl Into<String>) -> Self {
        Self::new(vec![(field.into(), Direction::Ascending)])
    }

    pub fn fields(&self) -> &[(String, Direction)] {
        &self.fields
    }

    pub fn first_field_name(&self) -> &str {
        &self.fields[0].0
    }

    /// `global_min` / `global_max`: sentinel keys strictly below/above any
    /// real key, one `MinKey`/`MaxKey` per field.
    pub fn global_min(&self) -> ShardKey {
        ShardKey(vec![KeyValue::MinKey; self.fields.len()])
    }

    pub fn global_max(&self) -> ShardKey {
        ShardKey(vec![KeyValue::MaxKey; self.fields.len()])
    }

    /// Lexicographic comparison over the pattern, honoring each field's
    /// direction.
    pub fn compare(&self, a: &ShardKey, b: &ShardKey) -> Ordering {
        for (i, (_, dir)) in self.fields.iter().enumerate() {
            let ord = a.0[i].cmp(&b.0[i]);
            let ord = match dir {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Wrap `key` together with this pattern's per-field directions, so a
    /// `BTreeMap` keyed on the result orders entries the same way
    /// [`Self::compare`] would, rather than via `ShardKey`'s own
    /// direction-blind `Ord`.
    pub fn order_key(&self, key: ShardKey) -> OrderedShardKey {
        OrderedShardKey {
            key,
            directions: self.fields.iter().map(|(_, dir)| *dir).collect(),
        }
    }
}

/// Monotonic per-chunk version (`lastmod` in the spec). `0` means
/// "never persisted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct ChunkVersion(u64);

impl ChunkVersion {
    pub const ZERO: Self = Self(0);

    pub fn new(v: u64) -> Self {
        Self(v)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for ChunkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_sentinel_ordering() {
        assert!(KeyValue::MinKey < KeyValue::Int(i64::MIN));
        assert!(KeyValue::Int(i64::MAX) < KeyValue::MaxKey);
        assert!(KeyValue::Null < KeyValue::Bool(false));
        assert!(KeyValue::Bool(true) < KeyValue::Int(0));
    }

    #[test]
    fn pattern_compare_respects_direction() {
        let pattern = ShardKeyPattern::new(vec![("a".into(), Direction::Descending)]);
        let lo = ShardKey::new(vec![KeyValue::Int(1)]);
        let hi = ShardKey::new(vec![KeyValue::Int(2)]);
        assert_eq!(pattern.compare(&lo, &hi), Ordering::Greater);
    }

    #[test]
    fn order_key_sorts_a_btreemap_the_way_compare_does() {
        use std::collections::BTreeMap;

        let pattern = ShardKeyPattern::new(vec![("a".into(), Direction::Descending)]);
        let mut map = BTreeMap::new();
        for v in [1, 2, 3] {
            let key = ShardKey::new(vec![KeyValue::Int(v)]);
            map.insert(pattern.order_key(key.clone()), key);
        }

        // Raw `ShardKey::Ord` would put these ascending (1, 2, 3); a
        // descending pattern must see them the other way around.
        let seen: Vec<i64> = map
            .values()
            .map(|k| match k.first_field() {
                KeyValue::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(seen, vec![3, 2, 1]);
    }

    #[test]
    fn namespace_rejects_empty() {
        assert!(NamespaceName::new("").is_err());
        assert!(NamespaceName::new("db.coll").is_ok());
    }
}
