//! Observability ecosystem dependencies, re-exported from one crate so the
//! rest of the workspace pins a single version rather than each crate
//! depending on `tracing` directly.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

pub use tracing;
