//! Change pollers: background reconciliation of the registry.
//!
//! # Data Flow
//! ```text
//! Poller::start (idempotent)
//!     → one tokio task per poller
//!     → every tick (or change wake-up):
//!         PollCycle::run_cycle
//!             → read authoritative set (store / filter directories)
//!             → diff against last-applied
//!             → FilterLoader::load for additions and changes
//!             → FilterRegistry::install(upserts, removed)
//! Poller::shutdown
//!     → Shutdown signal → loop exits → wake resources dropped
//! ```
//!
//! # Design Decisions
//! - A failed cycle is logged and retried on the next tick; the loop never dies
//! - Per-item compile failures keep the last-good entry serving
//! - Shutdown waits at most `shutdown_timeout`, then aborts the task

pub mod source;
pub mod store;

use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::error::Result;
use crate::filters::ChangeEvent;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::observability::metrics;

pub use source::{ExtensionPredicate, FilenamePredicate, SourceDirectory, SourcePoller};
pub use store::StorePoller;

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub installed: usize,
    pub removed: usize,
    pub failed: usize,
    pub unchanged: usize,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn outcome(&self) -> &'static str {
        if self.failed > 0 {
            "partial"
        } else if self.installed + self.removed > 0 {
            "applied"
        } else {
            "unchanged"
        }
    }
}

/// Something that can wake a poller before its next tick.
///
/// Owned by the poll loop and dropped when it exits, which releases any
/// watch handles it holds.
pub enum WakeSource {
    Never,
    Events(broadcast::Receiver<ChangeEvent>),
    Watch {
        _watcher: notify::RecommendedWatcher,
        rx: mpsc::Receiver<()>,
    },
}

impl WakeSource {
    async fn wait(&mut self) {
        let closed = match self {
            WakeSource::Never => return std::future::pending().await,
            WakeSource::Events(rx) => match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Coalesce a burst of events into one cycle.
                    while rx.try_recv().is_ok() {}
                    false
                }
                Err(broadcast::error::RecvError::Closed) => true,
            },
            WakeSource::Watch { rx, .. } => rx.recv().await.is_none(),
        };
        if closed {
            *self = WakeSource::Never;
            std::future::pending::<()>().await;
        }
    }
}

/// One reconciliation pass, implemented by each poller variant.
#[async_trait]
pub trait PollCycle: Send + 'static {
    fn name(&self) -> &'static str;

    async fn run_cycle(&mut self) -> Result<CycleReport>;

    /// Optional early wake-up source, created when the loop starts.
    fn wake_source(&mut self) -> WakeSource {
        WakeSource::Never
    }
}

struct Running {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

/// Lifecycle wrapper running a [`PollCycle`] on a fixed interval.
pub struct Poller<C: PollCycle> {
    cycle: Arc<Mutex<C>>,
    interval: Duration,
    shutdown_timeout: Duration,
    running: StdMutex<Option<Running>>,
}

impl<C: PollCycle> Poller<C> {
    pub fn new(cycle: C, interval: Duration) -> Self {
        Self {
            cycle: Arc::new(Mutex::new(cycle)),
            interval,
            shutdown_timeout: interval,
            running: StdMutex::new(None),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Start the background loop. Returns `false` when it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::debug!("Poller already running, start ignored");
            return false;
        }

        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        let handle = tokio::spawn(run_loop(self.cycle.clone(), self.interval, rx));
        *running = Some(Running { shutdown, handle });
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Stop the loop and wait (bounded) for it to exit. No-op when stopped.
    pub async fn shutdown(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running { shutdown, mut handle }) = running else {
            return;
        };

        shutdown.trigger();
        if time::timeout(self.shutdown_timeout, &mut handle).await.is_err() {
            tracing::warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "Poller did not stop in time, aborting"
            );
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Run a single cycle on the caller's task.
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.cycle.lock().await.run_cycle().await
    }
}

async fn run_loop<C: PollCycle>(
    cycle: Arc<Mutex<C>>,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    let (name, mut wake) = {
        let mut c = cycle.lock().await;
        (c.name(), c.wake_source())
    };
    tracing::info!(poller = name, interval_ms = interval.as_millis() as u64, "Poller starting");

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                tracing::info!(poller = name, "Poller received shutdown signal, exiting loop");
                break;
            }
            _ = ticker.tick() => {}
            _ = wake.wait() => {
                tracing::debug!(poller = name, "Poller woken by change notification");
            }
        }

        let result = cycle.lock().await.run_cycle().await;
        match result {
            Ok(report) => {
                if report.installed + report.removed + report.failed > 0 {
                    tracing::info!(
                        poller = name,
                        installed = report.installed,
                        removed = report.removed,
                        failed = report.failed,
                        unchanged = report.unchanged,
                        "Poll cycle complete"
                    );
                }
                metrics::record_poll_cycle(name, report.outcome());
            }
            Err(e) => {
                tracing::error!(poller = name, error = %e, "Poll cycle failed, retrying next interval");
                metrics::record_poll_cycle(name, "skipped");
            }
        }
    }

    drop(wake);
    tracing::info!(poller = name, "Poller stopped");
}
