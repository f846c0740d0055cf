//! `FixedHashTable` (§4.4): an open-addressed, linear-probing table over a
//! caller-supplied, fixed-capacity buffer. Included in this crate for the
//! same reason it sat alongside the original chunk map in the source file
//! set -- it is the index structure the storage layer builds on top of a
//! chunk's documents, not part of chunk routing itself.
//!
//! The distilled spec describes packing `{hash, key, value}` directly into
//! caller-supplied bytes; this implementation keeps the external-buffer,
//! fixed-capacity, no-rehash contract but expresses "bytes" as a safe
//! `&mut [Option<Slot<K, V>>]` the caller owns, rather than hand-rolled
//! byte-packing and an unsafe pointer cast.

use observability_deps::tracing::trace;

/// A key usable in a [`FixedHashTable`]. `hash_code` must never return `0`
/// (`0` is the table's unused-slot marker, per §4.4).
pub trait TableKey: PartialEq {
    fn hash_code(&self) -> u64;

    /// Hook run once, just before a slot is cleared by [`FixedHashTable::kill`].
    fn on_kill(&mut self) {}
}

/// One table entry. Opaque to callers: the buffer's element type, but not
/// something external code constructs directly -- `put` is the only way to
/// occupy a slot.
#[derive(Debug, Clone)]
pub struct Slot<K, V> {
    hash: u64,
    key: K,
    value: V,
}

/// Outcome of [`FixedHashTable::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Updated,
    /// `max_chain` slots were probed without finding the key or an empty
    /// slot (§7 "Capacity"). The caller decides what to do -- this type
    /// never grows or rehashes itself.
    Full,
}

enum Probe {
    Found(usize),
    Empty(usize),
    Exhausted,
}

/// Fixed-capacity open-addressed table borrowing its backing storage from
/// the caller. `n` (the number of slots) is forced odd, which spreads
/// linear-probe chains better against the low bits many hash functions
/// correlate on; `max_chain = floor(0.05 * n)` caps how far a lookup or
/// insert will walk before giving up.
#[derive(Debug)]
pub struct FixedHashTable<'a, K, V> {
    slots: &'a mut [Option<Slot<K, V>>],
    max_chain: usize,
}

impl<'a, K: TableKey, V> FixedHashTable<'a, K, V> {
    /// Build a table over `buffer`. If `buffer` has an even length, the
    /// last slot is left unused to force an odd capacity.
    pub fn new(buffer: &'a mut [Option<Slot<K, V>>]) -> Self {
        assert!(!buffer.is_empty(), "FixedHashTable needs at least one slot");
        let capacity = if buffer.len() % 2 == 0 {
            buffer.len() - 1
        } else {
            buffer.len()
        };
        let slots = &mut buffer[..capacity];
        let max_chain = ((capacity as f64) * 0.05).floor() as usize;
        Self {
            slots,
            max_chain: max_chain.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn probe(&self, hash: u64, key: &K) -> Probe {
        let start = (hash as usize) % self.slots.len();
        let chain = self.max_chain.min(self.slots.len());
        for step in 0..chain {
            let idx = (start + step) % self.slots.len();
            match &self.slots[idx] {
                Some(slot) if slot.hash == hash && &slot.key == key => return Probe::Found(idx),
                None => return Probe::Empty(idx),
                Some(_) => continue,
            }
        }
        Probe::Exhausted
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = key.hash_code();
        debug_assert_ne!(hash, 0, "TableKey::hash_code must never return 0");
        match self.probe(hash, key) {
            Probe::Found(idx) => self.slots[idx].as_ref().map(|s| &s.value),
            Probe::Empty(_) | Probe::Exhausted => None,
        }
    }

    /// Insert or overwrite. Overwrites in place on a key hit (§4.4 "`put`
    /// overwrites on key hit").
    pub fn put(&mut self, key: K, value: V) -> PutOutcome {
        let hash = key.hash_code();
        debug_assert_ne!(hash, 0, "TableKey::hash_code must never return 0");
        match self.probe(hash, &key) {
            Probe::Found(idx) => {
                self.slots[idx] = Some(Slot { hash, key, value });
                PutOutcome::Updated
            }
            Probe::Empty(idx) => {
                self.slots[idx] = Some(Slot { hash, key, value });
                PutOutcome::Inserted
            }
            Probe::Exhausted => {
                trace!(capacity = self.slots.len(), max_chain = self.max_chain, "table full");
                PutOutcome::Full
            }
        }
    }

    /// Run the key's `on_kill` hook, then clear its slot. Returns whether a
    /// matching entry existed.
    pub fn kill(&mut self, key: &K) -> bool {
        let hash = key.hash_code();
        match self.probe(hash, key) {
            Probe::Found(idx) => {
                if let Some(slot) = &mut self.slots[idx] {
                    slot.key.on_kill();
                }
                self.slots[idx] = None;
                true
            }
            Probe::Empty(_) | Probe::Exhausted => false,
        }
    }

    /// Visit in-use entries in array order (§4.4 "iteration hook").
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().filter_map(|slot| slot.as_ref().map(|s| (&s.key, &s.value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct IntKey(u64);

    impl TableKey for IntKey {
        fn hash_code(&self) -> u64 {
            self.0 + 1
        }
    }

    fn table(n: usize) -> Vec<Option<Slot<IntKey, &'static str>>> {
        (0..n).map(|_| None).collect()
    }

    #[test]
    fn forces_odd_capacity() {
        let mut buf = table(10);
        let t: FixedHashTable<'_, IntKey, &str> = FixedHashTable::new(&mut buf);
        assert_eq!(t.capacity(), 9);
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut buf = table(9);
        let mut t = FixedHashTable::new(&mut buf);
        assert_eq!(t.put(IntKey(1), "one"), PutOutcome::Inserted);
        assert_eq!(t.get(&IntKey(1)), Some(&"one"));
    }

    #[test]
    fn put_overwrites_on_key_hit() {
        let mut buf = table(9);
        let mut t = FixedHashTable::new(&mut buf);
        t.put(IntKey(1), "one");
        assert_eq!(t.put(IntKey(1), "uno"), PutOutcome::Updated);
        assert_eq!(t.get(&IntKey(1)), Some(&"uno"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn kill_clears_the_slot_and_runs_the_hook() {
        let mut buf = table(9);
        let mut t = FixedHashTable::new(&mut buf);
        t.put(IntKey(5), "five");
        assert!(t.kill(&IntKey(5)));
        assert_eq!(t.get(&IntKey(5)), None);
        assert!(!t.kill(&IntKey(5)));
    }

    #[test]
    fn iteration_visits_every_live_entry() {
        let mut buf = table(9);
        let mut t = FixedHashTable::new(&mut buf);
        t.put(IntKey(1), "one");
        t.put(IntKey(2), "two");
        t.put(IntKey(9), "nine");
        let mut seen: Vec<&str> = t.iter().map(|(_, v)| *v).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec!["nine", "one", "two"]);
    }

    #[test]
    fn full_table_reports_full_rather_than_growing() {
        // Capacity forced to 1 (even input len 2 -> 1), max_chain at least 1.
        let mut buf = table(2);
        let mut t = FixedHashTable::new(&mut buf);
        assert_eq!(t.capacity(), 1);
        assert_eq!(t.put(IntKey(1), "one"), PutOutcome::Inserted);
        assert_eq!(t.put(IntKey(2), "two"), PutOutcome::Full);
    }
}
