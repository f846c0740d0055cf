//! Query-predicate types consumed by [`crate::manager::ChunkManager::chunks_for_query`]
//! (§4.3). The predicate compiler itself (extracting field ranges out of a
//! query document) is an external collaborator (§1); this module is just
//! the shape the manager needs the compiled result in.

use data_types::KeyValue;

/// One side of an interval constraint on a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Unbounded,
    Inclusive(KeyValue),
    Exclusive(KeyValue),
}

/// A range constraint on one shard-key field: `lo <bound> field <bound> hi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRange {
    pub lower: Bound,
    pub upper: Bound,
}

impl FieldRange {
    pub fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn is_trivial(&self) -> bool {
        matches!(self.lower, Bound::Unbounded) && matches!(self.upper, Bound::Unbounded)
    }
}

/// A compiled predicate, restricted to what the §4.3 first-field-only
/// planner needs: an optional equality constraint and an optional range
/// constraint per field name, plus a flag for predicate shapes this core
/// has no support for (`$near`, text search, ...).
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    equals: Vec<(String, KeyValue)>,
    ranges: Vec<(String, FieldRange)>,
    unsupported: Option<&'static str>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_equals(mut self, field: impl Into<String>, value: KeyValue) -> Self {
        self.equals.push((field.into(), value));
        self
    }

    pub fn with_range(mut self, field: impl Into<String>, range: FieldRange) -> Self {
        self.ranges.push((field.into(), range));
        self
    }

    /// Mark this predicate as a shape with no routing support (§4.3 point 4).
    pub fn unsupported(reason: &'static str) -> Self {
        Self {
            unsupported: Some(reason),
            ..Self::default()
        }
    }

    pub fn unsupported_reason(&self) -> Option<&'static str> {
        self.unsupported
    }

    pub fn equality_for(&self, field: &str) -> Option<&KeyValue> {
        self.equals
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    pub fn range_for(&self, field: &str) -> Option<&FieldRange> {
        self.ranges.iter().find(|(f, _)| f == field).map(|(_, r)| r)
    }
}
