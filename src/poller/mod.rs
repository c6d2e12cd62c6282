//! Bounded-duration status polling.
//!
//! A [`PollingController`] reads a run's status once immediately and then on
//! a fixed interval until the run completes, the time ceiling is hit, or the
//! caller stops it. Only one read is in flight at a time. Read failures are
//! reported and polling carries on.

use crate::analysis::StatusReader;
use crate::models::{RunStage, RunStatus};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Where status snapshots come from (the local store, or a remote server).
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, run_id: &str) -> anyhow::Result<RunStatus>;
}

#[async_trait]
impl StatusSource for StatusReader {
    async fn fetch_status(&self, run_id: &str) -> anyhow::Result<RunStatus> {
        Ok(self.read_status(run_id).await?)
    }
}

/// Polling cadence and ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PollState {
    Idle,
    Polling,
    Complete,
    TimedOut,
    /// The source reported the run as failed.
    Errored,
    StoppedByCaller,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Idle | PollState::Polling)
    }
}

/// What the controller reports to its caller.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// A fresh snapshot.
    Status(RunStatus),
    /// A read failed; polling continues.
    ReadError(String),
    /// The run finished; no more reads follow.
    Completed,
    /// The source reported the run as failed; no more reads follow.
    Aborted,
    /// The ceiling was reached. `last` is the latest snapshot, marked failed
    /// locally; nothing in the store is changed.
    TimedOut {
        elapsed: Duration,
        last: Option<RunStatus>,
    },
}

struct Inner {
    state: PollState,
    /// Bumped on every start/stop so an old loop can tell it is stale.
    generation: u64,
    started_at: Option<Instant>,
}

struct Shared {
    inner: Mutex<Inner>,
    reads: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.lock();
        inner.generation == generation && inner.state == PollState::Polling
    }

    /// Move to a terminal state if `generation` still owns the controller.
    fn finish(&self, generation: u64, state: PollState) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != PollState::Polling {
            return false;
        }
        inner.state = state;
        inner.started_at = None;
        true
    }
}

/// Drives repeated status reads for one run at a time.
pub struct PollingController<S: StatusSource + ?Sized> {
    source: Arc<S>,
    config: PollingConfig,
    shared: Arc<Shared>,
}

impl<S: StatusSource + ?Sized + 'static> PollingController<S> {
    pub fn new(source: Arc<S>, config: PollingConfig) -> Self {
        Self {
            source,
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: PollState::Idle,
                    generation: 0,
                    started_at: None,
                }),
                reads: AtomicUsize::new(0),
            }),
        }
    }

    /// Start polling `run_id` with a fresh time window. Any previous
    /// activation is superseded.
    pub fn start(&self, run_id: impl Into<String>) -> mpsc::UnboundedReceiver<PollEvent> {
        let run_id = run_id.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (generation, started_at) = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.state = PollState::Polling;
            let now = Instant::now();
            inner.started_at = Some(now);
            (inner.generation, now)
        };
        self.shared.reads.store(0, Ordering::SeqCst);

        info!(
            "Polling run {} every {:?} (timeout {:?})",
            run_id, self.config.interval, self.config.timeout
        );

        tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            self.config,
            Arc::clone(&self.shared),
            generation,
            started_at,
            run_id,
            events_tx,
        ));

        events_rx
    }

    /// Stop polling. Reads already in flight are discarded.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if inner.state == PollState::Polling {
            inner.state = PollState::StoppedByCaller;
            debug!("Polling stopped by caller");
        }
        inner.generation += 1;
        inner.started_at = None;
    }

    pub fn state(&self) -> PollState {
        self.shared.lock().state
    }

    /// Time since the current activation, if polling.
    pub fn elapsed(&self) -> Option<Duration> {
        self.shared.lock().started_at.map(|t| t.elapsed())
    }

    /// Reads issued since the last `start`.
    pub fn reads_issued(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }
}

impl<S: StatusSource + ?Sized> Drop for PollingController<S> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
    }
}

async fn poll_loop<S: StatusSource + ?Sized>(
    source: Arc<S>,
    config: PollingConfig,
    shared: Arc<Shared>,
    generation: u64,
    started_at: Instant,
    run_id: String,
    events: mpsc::UnboundedSender<PollEvent>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<RunStatus> = None;
    // A read still in flight at the ceiling is abandoned.
    let deadline = started_at + config.timeout;

    loop {
        ticker.tick().await;
        if !shared.is_current(generation) {
            break;
        }

        if started_at.elapsed() > config.timeout {
            time_out(&shared, generation, started_at, &run_id, &mut last, &events);
            break;
        }

        shared.reads.fetch_add(1, Ordering::SeqCst);
        let result = match tokio::time::timeout_at(deadline, source.fetch_status(&run_id)).await {
            Ok(result) => result,
            Err(_) => {
                if shared.is_current(generation) {
                    time_out(&shared, generation, started_at, &run_id, &mut last, &events);
                }
                break;
            }
        };

        if !shared.is_current(generation) {
            debug!("Discarding late status for run {}", run_id);
            break;
        }

        match result {
            Ok(status) => {
                let complete = status.is_complete();
                let aborted = status.status == RunStage::Failed;
                last = Some(status.clone());
                let _ = events.send(PollEvent::Status(status));

                if complete {
                    if shared.finish(generation, PollState::Complete) {
                        info!("All answers complete for run {}, stopping polling", run_id);
                        let _ = events.send(PollEvent::Completed);
                    }
                    break;
                }
                if aborted {
                    if shared.finish(generation, PollState::Errored) {
                        warn!("Run {} reported as failed, stopping polling", run_id);
                        let _ = events.send(PollEvent::Aborted);
                    }
                    break;
                }
            }
            Err(e) => {
                warn!("Error polling status for run {}: {}", run_id, e);
                let _ = events.send(PollEvent::ReadError(e.to_string()));
            }
        }
    }
}

/// Enter `TimedOut` and hand the caller the last snapshot, marked failed.
fn time_out(
    shared: &Shared,
    generation: u64,
    started_at: Instant,
    run_id: &str,
    last: &mut Option<RunStatus>,
    events: &mpsc::UnboundedSender<PollEvent>,
) {
    if shared.finish(generation, PollState::TimedOut) {
        warn!("Max polling time reached for run {}, stopping", run_id);
        let last = last.take().map(|mut status| {
            status.status = RunStage::Failed;
            status
        });
        let _ = events.send(PollEvent::TimedOut {
            elapsed: started_at.elapsed(),
            last,
        });
    }
}
