//! A minimal metric registry.
//!
//! Mirrors the shape of the teacher's `metric` crate (a small, dependency-light
//! registry of named, `Clone`-able handles protected by `parking_lot`) without
//! its full attribute/histogram surface, which this crate has no use for.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

/// A monotonic counter, cheaply `Clone`-able and shared by every holder of
/// the handle returned from [`Registry::register_counter`].
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Registry of named [`U64Counter`]s.
#[derive(Debug, Default)]
pub struct Registry {
    counters: Mutex<HashMap<&'static str, U64Counter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the counter named `name`, creating it on first use.
    pub fn register_counter(&self, name: &'static str) -> U64Counter {
        self.counters.lock().entry(name).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_and_is_shared() {
        let registry = Registry::new();
        let a = registry.register_counter("splits");
        let b = registry.register_counter("splits");

        a.inc(1);
        b.inc(2);

        assert_eq!(a.fetch(), 3);
        assert_eq!(b.fetch(), 3);
        assert_eq!(registry.register_counter("migrates").fetch(), 0);
    }
}
