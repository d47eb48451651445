//! Shared test-only tracing setup, matching
//! `compio-quic/tests/common/mod.rs`'s `subscribe()` helper: installs a
//! `fmt` subscriber scoped to the calling test via `RUST_LOG`/`EnvFilter`
//! so `iso.rs`'s `debug!`/`trace!`/`warn!` instrumentation is visible with
//! `--nocapture` instead of silently going nowhere for lack of a subscriber.

use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

#[allow(dead_code)]
pub fn subscribe() -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .finish()
        .set_default()
}
