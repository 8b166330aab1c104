//! Decides when the dispatcher drains the queue.
//!
//! One background task owns every trigger: startup, the periodic tick, the
//! transition to online, and explicit wakeups after an enqueue. Triggers that
//! arrive while a drain is running collapse into a single follow-up drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::connectivity::Connectivity;
use super::dispatcher::Dispatcher;
use crate::state::SyncState;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for the scheduler task. Consumed by [`Scheduler::spawn`].
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    tick: Duration,
    wake: Arc<Notify>,
    connectivity: watch::Receiver<Connectivity>,
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<SyncState>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        // Without a connectivity source the sender is dropped right away and
        // the scheduler never waits on it.
        let (_, connectivity) = watch::channel(Connectivity::Online);
        Self {
            dispatcher,
            tick: DEFAULT_TICK_INTERVAL,
            wake: Arc::new(Notify::new()),
            connectivity,
        }
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Share a wakeup signal with producers such as the engine's enqueue path.
    #[must_use]
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    #[must_use]
    pub fn with_connectivity(mut self, connectivity: watch::Receiver<Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SyncState::Idle);
        let wake = self.wake.clone();
        let task = tokio::spawn(self.run(shutdown_rx, state_tx));

        SchedulerHandle {
            wake,
            shutdown: shutdown_tx,
            state: state_rx,
            task,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>, state: watch::Sender<SyncState>) {
        // The startup drain recovers operations an earlier run left in flight
        self.drain("startup", &state).await;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                connectivity = next_connectivity(&mut self.connectivity) => {
                    if connectivity.is_online() {
                        self.drain("reconnect", &state).await;
                    } else {
                        state.send_replace(SyncState::Offline);
                    }
                }
                () = self.wake.notified() => self.drain("enqueue", &state).await,
                _ = ticker.tick() => self.drain("tick", &state).await,
            }
        }
        tracing::debug!("Scheduler stopped");
    }

    async fn drain(&self, trigger: &'static str, state: &watch::Sender<SyncState>) {
        state.send_replace(SyncState::Syncing);
        let next = match self.dispatcher.process_once().await {
            Ok(report) => {
                if !report.skipped && report.claimed > 0 {
                    tracing::debug!(
                        trigger,
                        claimed = report.claimed,
                        delivered = report.delivered,
                        "Scheduled drain finished"
                    );
                }
                if report.failed() > 0 {
                    SyncState::Error
                } else {
                    SyncState::Idle
                }
            }
            Err(error) => {
                tracing::error!(trigger, error = %error, "Scheduled drain failed");
                SyncState::Error
            }
        };

        let next = if next == SyncState::Idle && !self.connectivity.borrow().is_online() {
            SyncState::Offline
        } else {
            next
        };
        state.send_replace(next);
    }
}

/// Wait for the next connectivity change; never resolves once the source is gone.
async fn next_connectivity(receiver: &mut watch::Receiver<Connectivity>) -> Connectivity {
    if receiver.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
    *receiver.borrow_and_update()
}

impl SchedulerHandle {
    /// Request a drain as soon as the scheduler is free.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Stop scheduling drains and wait for an in-flight drain to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::error!(error = %error, "Scheduler task ended abnormally");
        }
    }
}
