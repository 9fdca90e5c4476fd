// src/notify/mod.rs
//! Notification fan-out.
//!
//! Workers push [`DiscoveryEvent`]s onto a bounded channel; a single fan-out
//! task drains it and hands every event to all registered notifiers at once.
//! A slow or failing notifier never holds up polling or touches stored state.

pub mod desktop;
pub mod email;
pub mod hook;
pub mod ntfy;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::NotificationsConfig;
use crate::engine::DiscoveryEvent;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver one event. Notifiers ignore the event shape they do not use.
    async fn send(&self, ev: &DiscoveryEvent) -> Result<()>;
}

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct NotifierMux {
    sinks: Vec<Arc<dyn Notifier>>,
    send_timeout: Duration,
    max_in_flight: usize,
}

impl Default for NotifierMux {
    fn default() -> Self {
        Self {
            sinks: Vec::new(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Build the notifiers enabled in the config.
    pub fn from_config(cfg: &NotificationsConfig) -> Result<Self> {
        let mut mux = Self::new().with_send_timeout(Duration::from_secs(cfg.send_timeout_secs.max(1)));
        if cfg.desktop {
            mux = mux.with(Arc::new(desktop::DesktopNotifier::new()));
        }
        if let Some(topic) = &cfg.ntfy_topic {
            mux = mux.with(Arc::new(
                ntfy::NtfyNotifier::new(&cfg.ntfy_server, topic).with_timeout(cfg.ntfy_timeout_secs),
            ));
        }
        for cmd in &cfg.hooks {
            mux = mux.with(Arc::new(hook::HookNotifier::new(cmd.clone())?));
        }
        if let Some(email) = &cfg.email {
            mux = mux.with(Arc::new(email::EmailNotifier::from_config(email)?));
        }
        tracing::info!(sinks = ?mux.names(), "notifiers configured");
        Ok(mux)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Per-call deadline for a single notifier.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Upper bound on notifier calls running at once.
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }

    /// Consume events until every sender is dropped.
    ///
    /// The receive loop never waits on a notifier: every call runs in its own
    /// task, at most `max_in_flight` at once, each bounded by the send timeout.
    /// Once the channel closes, calls still running get `SHUTDOWN_GRACE` to
    /// finish before they are aborted.
    pub fn spawn(self, mut rx: mpsc::Receiver<DiscoveryEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let limit = Arc::new(Semaphore::new(self.max_in_flight));
            let mut in_flight = JoinSet::new();

            loop {
                tokio::select! {
                    ev = rx.recv() => {
                        let Some(ev) = ev else { break };
                        for sink in &self.sinks {
                            let limit = limit.clone();
                            let (sink, ev, timeout) = (sink.clone(), ev.clone(), self.send_timeout);
                            in_flight.spawn(async move {
                                let Ok(_permit) = limit.acquire_owned().await else {
                                    return;
                                };
                                deliver(sink, ev, timeout).await;
                            });
                        }
                    }
                    Some(joined) = in_flight.join_next() => {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "notifier task panicked");
                        }
                    }
                }
            }

            let pending = in_flight.len();
            let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
                while in_flight.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(pending, "notifications still running at shutdown; aborting");
                in_flight.abort_all();
            }
            tracing::debug!("notification fan-out finished");
        })
    }
}

async fn deliver(sink: Arc<dyn Notifier>, ev: DiscoveryEvent, timeout: Duration) {
    match tokio::time::timeout(timeout, sink.send(&ev)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(notifier = sink.name(), kind = ev.kind(), error = %e, "notification failed")
        }
        Err(_) => {
            tracing::warn!(notifier = sink.name(), kind = ev.kind(), ?timeout, "notification timed out")
        }
    }
}
