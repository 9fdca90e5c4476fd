// src/engine/dispatcher.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;

use super::worker::{Task, TaskQueue, TaskReport, Worker};
use super::{ensure_metrics_described, EngineContext};
use crate::errors::EngineError;
use crate::model::OwnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Cycling,
    Draining,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub owners: Vec<OwnerId>,
    pub interval: Duration,
    pub num_workers: usize,
    /// Stop after this many cycles (`None` = run until cancelled).
    pub max_cycles: Option<u64>,
}

impl DispatcherConfig {
    pub fn new(owners: Vec<OwnerId>, interval: Duration, num_workers: usize) -> Self {
        Self {
            owners,
            interval,
            num_workers: num_workers.max(1),
            max_cycles: None,
        }
    }

    pub fn with_max_cycles(mut self, n: u64) -> Self {
        self.max_cycles = Some(n);
        self
    }
}

/// Tally of one cycle, logged when the drain barrier is passed.
#[derive(Debug, Default, Clone, Copy)]
struct CycleStats {
    reported: usize,
    new_items: usize,
    abandoned: usize,
    failed: usize,
    cancelled: usize,
}

impl CycleStats {
    fn record(&mut self, r: &TaskReport) {
        self.reported += 1;
        match &r.result {
            Ok(n) => self.new_items += n,
            Err(EngineError::Abandoned { .. }) => self.abandoned += 1,
            Err(EngineError::Cancelled) => self.cancelled += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Runs polling cycles over all owners with a fixed pool of workers.
///
/// A cycle enqueues every owner once in a fresh random order, waits until
/// every task has been reported back, then sleeps for the interval.
pub struct Dispatcher {
    cfg: DispatcherConfig,
    ctx: Arc<EngineContext>,
    state: watch::Sender<DispatcherState>,
}

impl Dispatcher {
    pub fn new(cfg: DispatcherConfig, ctx: Arc<EngineContext>) -> Self {
        let (state, _) = watch::channel(DispatcherState::Idle);
        Self { cfg, ctx, state }
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    fn set_state(&self, s: DispatcherState) {
        self.state.send_replace(s);
    }

    /// Run until cancelled, the cycle limit is reached or a fatal error occurs.
    /// Returns the number of completed cycles.
    pub async fn run(self) -> Result<u64, EngineError> {
        ensure_metrics_described();
        tracing::info!(
            source = self.ctx.source.name(),
            owners = self.cfg.owners.len(),
            workers = self.cfg.num_workers,
            interval = ?self.cfg.interval,
            "dispatcher starting"
        );

        let (task_tx, task_rx) = mpsc::channel::<Task>(self.cfg.owners.len().max(1));
        let queue: TaskQueue = Arc::new(Mutex::new(task_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for id in 0..self.cfg.num_workers {
            let worker = Worker::new(id, self.ctx.clone());
            workers.spawn(worker.run(queue.clone(), done_tx.clone()));
        }
        drop(done_tx);

        let mut result = self.cycle_loop(&task_tx, &mut done_rx, &mut workers).await;
        self.set_state(DispatcherState::Stopped);

        if result.is_err() {
            self.ctx.cancel.cancel();
        }
        // Closing the queue lets idle workers return.
        drop(task_tx);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "worker exited with error"),
                Err(e) => tracing::error!(error = %e, "worker task panicked"),
            }
        }

        if let Err(e) = self.ctx.seen.flush().await {
            tracing::error!(error = %e, "final seen store flush failed");
            if result.is_ok() {
                result = Err(e);
            }
        }
        tracing::info!(ok = result.is_ok(), "dispatcher stopped");
        result
    }

    async fn cycle_loop(
        &self,
        task_tx: &mpsc::Sender<Task>,
        done_rx: &mut mpsc::UnboundedReceiver<TaskReport>,
        workers: &mut JoinSet<Result<(), EngineError>>,
    ) -> Result<u64, EngineError> {
        let cancel = &self.ctx.cancel;
        let mut cycle = 0u64;

        loop {
            if cancel.is_cancelled() || self.limit_reached(cycle) {
                return Ok(cycle);
            }
            cycle += 1;
            self.set_state(DispatcherState::Cycling);
            let started = Instant::now();

            let mut order = self.cfg.owners.clone();
            order.shuffle(&mut rand::rng());
            tracing::debug!(cycle, ?order, "cycle started");
            for &owner in &order {
                task_tx
                    .send(Task { cycle, owner })
                    .await
                    .map_err(|_| EngineError::WorkerCrashed {
                        worker: usize::MAX,
                        reason: "task queue closed".into(),
                    })?;
            }

            self.set_state(DispatcherState::Draining);
            let stats = self.drain(order.len(), done_rx, workers).await?;

            // Retry any flush a worker could not complete.
            if self.ctx.seen.is_dirty() {
                if let Err(e) = self.ctx.seen.flush().await {
                    counter!("artwatch_persist_failures_total").increment(1);
                    tracing::error!(cycle, error = %e, "seen store could not be persisted this cycle");
                }
            }

            let elapsed = started.elapsed();
            counter!("artwatch_cycles_total").increment(1);
            histogram!("artwatch_cycle_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
            gauge!("artwatch_last_cycle_ts").set(chrono::Utc::now().timestamp() as f64);
            if stats.failed > 0 {
                tracing::error!(cycle, failed = stats.failed, "cycle finished with persistence failures");
            }
            tracing::info!(
                cycle,
                tasks = stats.reported,
                new_items = stats.new_items,
                abandoned = stats.abandoned,
                failed = stats.failed,
                cancelled = stats.cancelled,
                elapsed_ms = elapsed.as_millis() as u64,
                "cycle complete"
            );

            if cancel.is_cancelled() || self.limit_reached(cycle) {
                return Ok(cycle);
            }

            self.set_state(DispatcherState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(cycle),
                _ = tokio::time::sleep(self.cfg.interval) => {}
            }
        }
    }

    fn limit_reached(&self, cycle: u64) -> bool {
        self.cfg.max_cycles.is_some_and(|max| cycle >= max)
    }

    /// Barrier: wait for `expected` reports. Fatal task errors and worker
    /// exits cancel the engine and end the run.
    async fn drain(
        &self,
        expected: usize,
        done_rx: &mut mpsc::UnboundedReceiver<TaskReport>,
        workers: &mut JoinSet<Result<(), EngineError>>,
    ) -> Result<CycleStats, EngineError> {
        let mut stats = CycleStats::default();
        let mut fatal: Option<EngineError> = None;

        while stats.reported < expected {
            tokio::select! {
                biased;
                report = done_rx.recv() => {
                    let Some(report) = report else {
                        self.ctx.cancel.cancel();
                        return Err(fatal.unwrap_or(EngineError::WorkerCrashed {
                            worker: usize::MAX,
                            reason: "all workers exited".into(),
                        }));
                    };
                    stats.record(&report);
                    let TaskReport { task, worker, result } = report;
                    let Err(e) = result else { continue };
                    if fatal.is_some() {
                        continue;
                    }
                    // The reporting worker is about to exit; stop now rather
                    // than on the next cycle.
                    let crashed = self.ctx.crash_on_exception
                        && matches!(e, EngineError::Abandoned { .. } | EngineError::Persist { .. });
                    if e.is_fatal() || crashed {
                        tracing::error!(owner = task.owner, worker, error = %e, "fatal task error; stopping");
                        self.ctx.cancel.cancel();
                        fatal = Some(if crashed {
                            EngineError::WorkerCrashed { worker, reason: e.to_string() }
                        } else {
                            e
                        });
                    }
                }
                Some(joined) = workers.join_next() => {
                    self.ctx.cancel.cancel();
                    return Err(match joined {
                        Ok(Err(e)) => e,
                        Ok(Ok(())) => EngineError::WorkerCrashed {
                            worker: usize::MAX,
                            reason: "worker left while tasks were pending".into(),
                        },
                        Err(e) => EngineError::WorkerCrashed {
                            worker: usize::MAX,
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}
