//! Shared test scaffolding, pulled in as a dev-dependency by every other
//! crate in the workspace.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

use parking_lot::Once;

static START: Once = Once::new();

/// Enable `tracing` output in tests, idempotently.
///
/// Tests that want to see `info!`/`warn!` output from the crate under test
/// (most don't need to) call this first.
pub fn maybe_start_logging() {
    START.call_once(|| {
        tracing_log::LogTracer::init().ok();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        let _ = observability_deps::tracing::subscriber::set_global_default(subscriber);
    });
}
