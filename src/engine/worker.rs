// src/engine/worker.rs
use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, Mutex};

use super::{DiscoveryEvent, EngineContext};
use crate::credentials::CredentialSlot;
use crate::errors::{ApiError, CredentialError, EngineError};
use crate::model::{Item, OwnerId};

/// One owner to poll in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub cycle: u64,
    pub owner: OwnerId,
}

/// Sent back to the dispatcher for every dequeued task, whatever happened.
#[derive(Debug)]
pub struct TaskReport {
    pub task: Task,
    pub worker: usize,
    /// Number of new items on success.
    pub result: Result<usize, EngineError>,
}

impl TaskReport {
    pub fn outcome(&self) -> &'static str {
        match &self.result {
            Ok(_) => "completed",
            Err(EngineError::Abandoned { .. }) => "abandoned",
            Err(EngineError::Cancelled) => "cancelled",
            Err(e) if e.is_fatal() => "fatal",
            Err(_) => "failed",
        }
    }
}

pub(crate) type TaskQueue = Arc<Mutex<mpsc::Receiver<Task>>>;

/// Per-task retry bookkeeping.
#[derive(Debug, Default)]
struct Attempts {
    transient: u32,
    malformed: bool,
    rate_limited: usize,
}

pub struct Worker {
    id: usize,
    ctx: Arc<EngineContext>,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<EngineContext>) -> Self {
        Self { id, ctx }
    }

    /// Pull tasks until the queue closes. Returns an error only when
    /// `crash_on_exception` turns an abandoned task into a worker crash.
    pub(crate) async fn run(
        self,
        queue: TaskQueue,
        done: mpsc::UnboundedSender<TaskReport>,
    ) -> Result<(), EngineError> {
        loop {
            let next = {
                let mut rx = queue.lock().await;
                rx.recv().await
            };
            let Some(task) = next else {
                tracing::trace!(worker = self.id, "task queue closed");
                return Ok(());
            };

            let result = if self.ctx.cancel.is_cancelled() {
                Err(EngineError::Cancelled)
            } else {
                self.process(task.owner).await
            };

            let crash = match &result {
                Err(e @ (EngineError::Abandoned { .. } | EngineError::Persist { .. }))
                    if self.ctx.crash_on_exception =>
                {
                    Some(e.to_string())
                }
                _ => None,
            };

            let report = TaskReport {
                task,
                worker: self.id,
                result,
            };
            counter!("artwatch_tasks_total", "outcome" => report.outcome()).increment(1);
            if done.send(report).is_err() {
                tracing::debug!(worker = self.id, "dispatcher stopped listening");
            }

            if let Some(reason) = crash {
                tracing::error!(worker = self.id, %reason, "worker terminating (crash_on_exception)");
                return Err(EngineError::WorkerCrashed {
                    worker: self.id,
                    reason,
                });
            }
        }
    }

    /// Fetch one owner, record and announce new items, flush the seen set.
    pub async fn process(&self, owner: OwnerId) -> Result<usize, EngineError> {
        let items = match self.fetch_with_retry(owner).await {
            Ok(items) => items,
            Err(e) => {
                match &e {
                    EngineError::Cancelled => {
                        tracing::debug!(worker = self.id, owner, "task cancelled")
                    }
                    EngineError::Abandoned { source, .. } => {
                        tracing::error!(worker = self.id, owner, error = %source, "task abandoned for this cycle")
                    }
                    other => tracing::error!(worker = self.id, owner, error = %other, "task failed"),
                }
                return Err(e);
            }
        };

        let (new_count, persist_err) = self.deliver(owner, items).await;

        if let Err(e) = self.ctx.seen.flush().await {
            counter!("artwatch_persist_failures_total").increment(1);
            tracing::error!(worker = self.id, owner, error = %e, "seen store flush failed; will retry");
            return Err(e);
        }
        match persist_err {
            Some(e) => Err(e),
            None => Ok(new_count),
        }
    }

    /// Walk the batch in upstream order and emit events for unseen ids.
    async fn deliver(&self, owner: OwnerId, items: Vec<Item>) -> (usize, Option<EngineError>) {
        let mut new_count = 0usize;
        let mut first: Option<Arc<Item>> = None;
        let mut persist_err = None;

        for item in items {
            if !self.ctx.seen.add(item.id) {
                continue;
            }
            new_count += 1;
            let item = Arc::new(item);
            first.get_or_insert_with(|| item.clone());
            counter!("artwatch_items_discovered_total").increment(1);
            tracing::info!(worker = self.id, owner, item = item.id, "New item: {}", item.summary_line());

            if let Err(e) = self.ctx.log.append(&item).await {
                counter!("artwatch_persist_failures_total").increment(1);
                tracing::error!(worker = self.id, owner, item = item.id, error = %e, "discovery log append failed");
                persist_err.get_or_insert(e);
            }
            self.emit(DiscoveryEvent::ItemDiscovered { item }).await;
        }

        if let Some(first_item) = first {
            self.emit(DiscoveryEvent::BatchSummary {
                owner,
                new_count,
                first_item,
            })
            .await;
        }
        (new_count, persist_err)
    }

    /// Queue `ev` for the notifiers. A full queue holds the worker back only
    /// until cancellation; the item is already recorded either way.
    async fn emit(&self, ev: DiscoveryEvent) {
        let kind = ev.kind();
        tokio::select! {
            biased;
            sent = self.ctx.events.send(ev) => {
                if sent.is_err() {
                    tracing::warn!(worker = self.id, kind, "notification fan-out is gone; event dropped");
                }
            }
            _ = self.ctx.cancel.cancelled() => {
                tracing::warn!(worker = self.id, kind, "shutting down with notification queue full; event dropped");
            }
        }
    }

    /// Call the content source until it succeeds or the task has to be given up.
    pub async fn fetch_with_retry(&self, owner: OwnerId) -> Result<Vec<Item>, EngineError> {
        let pool = &self.ctx.pool;
        let mut attempts = Attempts::default();
        let mut slot = pool.current().await?;

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if slot.needs_refresh() {
                slot = self.refreshed(owner, &slot, &mut attempts).await?;
                continue;
            }

            let err = match self.ctx.source.fetch(owner, &slot).await {
                Ok(items) => return Ok(items),
                Err(e) => e,
            };
            counter!("artwatch_fetch_errors_total", "kind" => err.kind()).increment(1);

            if !matches!(err, ApiError::Transient(_)) {
                attempts.transient = 0;
            }
            if !matches!(err, ApiError::RateLimited) {
                attempts.rate_limited = 0;
            }

            match err {
                ApiError::AuthExpired => {
                    tracing::debug!(worker = self.id, owner, slot = slot.index, "access credential expired; refreshing");
                    slot = self.refreshed(owner, &slot, &mut attempts).await?;
                }
                ApiError::RateLimited => {
                    attempts.rate_limited += 1;
                    let from = slot.index;
                    slot = pool.rotate(from).await?;
                    tracing::debug!(worker = self.id, owner, from, to = slot.index, "rate limited; rotated slot");
                    // Every usable slot was rate limited once in a row: back off.
                    if attempts.rate_limited % pool.valid_count().max(1) == 0 {
                        self.pause().await?;
                    }
                }
                ApiError::Transient(reason) => {
                    self.transient(owner, reason, &mut attempts).await?;
                }
                ApiError::Malformed(reason) => {
                    if attempts.malformed {
                        return Err(EngineError::Abandoned {
                            owner,
                            source: ApiError::Malformed(reason),
                        });
                    }
                    attempts.malformed = true;
                    tracing::warn!(worker = self.id, owner, %reason, "unexpected upstream response; retrying once");
                }
            }
        }
    }

    /// Refresh `slot`, or move on to another slot when it was rejected.
    async fn refreshed(
        &self,
        owner: OwnerId,
        slot: &CredentialSlot,
        attempts: &mut Attempts,
    ) -> Result<CredentialSlot, EngineError> {
        match self.ctx.pool.refresh(slot).await {
            Ok(fresh) => Ok(fresh),
            Err(CredentialError::Rejected { slot, reason }) => {
                tracing::warn!(worker = self.id, owner, slot, %reason, "credential slot rejected; switching");
                Ok(self.ctx.pool.current().await?)
            }
            Err(CredentialError::Unavailable { reason, .. }) => {
                self.transient(owner, reason, attempts).await?;
                Ok(slot.clone())
            }
            Err(e @ CredentialError::PoolExhausted) => Err(e.into()),
        }
    }

    async fn transient(
        &self,
        owner: OwnerId,
        reason: String,
        attempts: &mut Attempts,
    ) -> Result<(), EngineError> {
        attempts.transient += 1;
        if attempts.transient > self.ctx.retry.transient_retry_limit {
            return Err(EngineError::Abandoned {
                owner,
                source: ApiError::Transient(reason),
            });
        }
        tracing::warn!(
            worker = self.id,
            owner,
            attempt = attempts.transient,
            %reason,
            "transient failure; retrying in {:?}",
            self.ctx.retry.delay
        );
        self.pause().await
    }

    /// Sleep for the retry delay unless cancellation arrives first.
    async fn pause(&self) -> Result<(), EngineError> {
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(self.ctx.retry.delay) => Ok(()),
        }
    }
}
