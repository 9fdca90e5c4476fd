// src/engine/mod.rs
//! Polling engine: a dispatcher that runs cycles over all owners and a fixed
//! pool of workers that fetch, deduplicate, persist and announce new items.

pub mod dispatcher;
pub mod events;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherState};
pub use events::DiscoveryEvent;
pub use worker::{Task, TaskReport, Worker};

use std::sync::Arc;
use std::time::Duration;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialPool;
use crate::source::ContentSource;
use crate::store::{DiscoveryLog, SeenStore};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Wait before retrying after a transient failure or a full round of rate limits.
    pub delay: Duration,
    pub transient_retry_limit: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            transient_retry_limit: 5,
        }
    }
}

/// Everything a worker shares with the other workers.
pub struct EngineContext {
    pub source: Arc<dyn ContentSource>,
    pub pool: Arc<CredentialPool>,
    pub seen: Arc<SeenStore>,
    pub log: Arc<DiscoveryLog>,
    pub events: mpsc::Sender<DiscoveryEvent>,
    pub retry: RetryPolicy,
    /// Abandoned tasks terminate their worker (and with it the dispatcher).
    pub crash_on_exception: bool,
    pub cancel: CancellationToken,
}

impl EngineContext {
    pub fn new(
        source: Arc<dyn ContentSource>,
        pool: Arc<CredentialPool>,
        seen: Arc<SeenStore>,
        log: Arc<DiscoveryLog>,
        events: mpsc::Sender<DiscoveryEvent>,
    ) -> Self {
        Self {
            source,
            pool,
            seen,
            log,
            events,
            retry: RetryPolicy::default(),
            crash_on_exception: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_crash_on_exception(mut self, crash: bool) -> Self {
        self.crash_on_exception = crash;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("artwatch_cycles_total", "Completed polling cycles.");
        describe_counter!("artwatch_tasks_total", "Tasks processed, by outcome.");
        describe_counter!(
            "artwatch_items_discovered_total",
            "Items seen for the first time."
        );
        describe_counter!(
            "artwatch_fetch_errors_total",
            "Classified upstream fetch failures, by kind."
        );
        describe_counter!(
            "artwatch_credential_refresh_total",
            "Refresh requests sent to the token endpoint."
        );
        describe_counter!(
            "artwatch_credential_rotations_total",
            "Credential slot rotations caused by rate limits."
        );
        describe_counter!(
            "artwatch_persist_failures_total",
            "Failed writes of the seen set or discovery log."
        );
        describe_histogram!("artwatch_cycle_duration_ms", "Cycle duration in milliseconds.");
        describe_histogram!("artwatch_fetch_ms", "Upstream fetch time in milliseconds.");
        describe_gauge!("artwatch_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}
