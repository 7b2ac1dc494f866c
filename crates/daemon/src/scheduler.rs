use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::ledger::Ledger;
use crate::service::{CycleError, OracleService};
use crate::store::EvidenceStore;

struct Timer {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic driver for [`OracleService::run_cycle`].
///
/// At most one timer task exists at a time. Stopping is cooperative: a cycle
/// already running finishes before the loop observes the signal.
pub struct Scheduler<S, L> {
    service: Arc<OracleService<S, L>>,
    interval: Duration,
    timer: Mutex<Option<Timer>>,
}

impl<S: EvidenceStore, L: Ledger> Scheduler<S, L> {
    /// Creates a stopped scheduler.
    pub fn new(service: Arc<OracleService<S, L>>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            timer: Mutex::new(None),
        }
    }

    /// Configured period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a timer task is alive.
    pub fn is_running(&self) -> bool {
        self.timer().as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    /// Spawns the timer. Returns false if one is already running.
    pub fn start(&self) -> bool {
        let mut timer = self.timer();
        if timer.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_timer(Arc::clone(&self.service), self.interval, stop_rx));
        *timer = Some(Timer { stop_tx, handle });
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");
        true
    }

    /// Signals the timer to exit. Returns false if none was running.
    pub fn stop(&self) -> bool {
        self.take_timer().is_some()
    }

    /// Like [`stop`](Self::stop) but also waits for the loop to exit.
    pub async fn stop_and_wait(&self) -> bool {
        let Some(handle) = self.take_timer() else {
            return false;
        };
        if let Err(e) = handle.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
        true
    }

    fn take_timer(&self) -> Option<JoinHandle<()>> {
        let timer = self.timer().take()?;
        let was_running = !timer.handle.is_finished();
        // Receiver may already be gone if the loop exited on its own.
        let _ = timer.stop_tx.send(true);
        if was_running {
            info!("scheduler stop requested");
            Some(timer.handle)
        } else {
            None
        }
    }

    fn timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_timer<S: EvidenceStore, L: Ledger>(
    service: Arc<OracleService<S, L>>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {
                match service.run_cycle().await {
                    Ok(_) => {}
                    Err(CycleError::AlreadyRunning) => {
                        info!("skipping tick; a manual cycle is running");
                    }
                    Err(e) => warn!(error = %e, "cycle failed"),
                }
            }
        }
    }
    info!("scheduler stopped");
}
