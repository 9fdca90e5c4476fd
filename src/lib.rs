// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod errors;
pub mod feed;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod source;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::engine::{DiscoveryEvent, Dispatcher, DispatcherConfig, EngineContext, RetryPolicy};
pub use crate::errors::{ApiError, CredentialError, EngineError};
pub use crate::notify::{Notifier, NotifierMux};

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::MonitorConfig;
use crate::credentials::{oauth::OAuthIssuer, CredentialPool};
use crate::source::app_api::AppApiSource;
use crate::store::{DiscoveryLog, SeenStore};

/// Wire the app API source, stores and notifiers from `cfg` and run the
/// dispatcher until `cancel` fires or a fatal error stops it.
pub async fn run_monitor(cfg: &MonitorConfig, cancel: CancellationToken) -> anyhow::Result<u64> {
    let pool = CredentialPool::new(
        cfg.resolve_credentials()?,
        Arc::new(OAuthIssuer::new(&cfg.api)?),
    );
    let seen = SeenStore::load(&cfg.storage.seen_path)
        .await
        .context("loading seen store")?;
    info!(seen = seen.len(), path = %seen.path().display(), "seen store ready");

    let mux = NotifierMux::from_config(&cfg.notifications)?;
    let (events_tx, events_rx) = mpsc::channel(cfg.event_buffer);
    let fanout = mux.spawn(events_rx);

    let ctx = EngineContext::new(
        Arc::new(AppApiSource::new(&cfg.api)?),
        Arc::new(pool),
        Arc::new(seen),
        Arc::new(DiscoveryLog::new(&cfg.storage.log_path)),
        events_tx,
    )
    .with_retry(RetryPolicy {
        delay: cfg.retry_delay(),
        transient_retry_limit: cfg.retry.transient_retry_limit,
    })
    .with_crash_on_exception(cfg.crash_on_exception)
    .with_cancel(cancel);

    let dispatcher = Dispatcher::new(
        DispatcherConfig::new(cfg.owner_ids.clone(), cfg.interval(), cfg.num_workers),
        Arc::new(ctx),
    );
    let result = dispatcher.run().await;

    // The dispatcher held the last event sender; let the fan-out finish.
    if let Err(e) = fanout.await {
        tracing::warn!(error = %e, "notification fan-out ended abnormally");
    }
    Ok(result?)
}
