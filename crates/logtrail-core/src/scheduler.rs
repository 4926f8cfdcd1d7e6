use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::manager::SessionManager;
use crate::report::ScanStatus;

/// Drives the initial full scan and periodic refreshes.
pub struct ScanScheduler {
    manager: SessionManager,
    interval: Duration,
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    manager: SessionManager,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    status: watch::Receiver<ScanStatus>,
}

impl ScanScheduler {
    pub fn new(manager: SessionManager) -> Self {
        let interval = manager.config().scan_interval;
        Self { manager, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the scheduler loop.
    ///
    /// Runs one full scan immediately. A missing root ends the loop with
    /// [`ScanStatus::NoSessions`]; otherwise every tick sweeps deleted
    /// watched files and refreshes.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let (status_tx, status_rx) = watch::channel(ScanStatus::Idle);
        let manager = self.manager.clone();
        let interval = self.interval;

        let join = tokio::spawn(async move {
            status_tx.send_replace(ScanStatus::Scanning);
            let initial = tokio::select! {
                result = manager.scan_all() => result,
                _ = &mut shutdown_rx => {
                    status_tx.send_replace(ScanStatus::Stopped);
                    return;
                }
            };
            match initial {
                Ok(report) if report.no_sessions => {
                    info!("No sessions directory; scheduler stopping");
                    status_tx.send_replace(ScanStatus::NoSessions);
                    return;
                }
                Ok(report) => {
                    status_tx.send_replace(ScanStatus::Completed { report });
                }
                Err(e) => {
                    warn!(error = %e, "Initial scan failed");
                    status_tx.send_replace(ScanStatus::Idle);
                }
            }

            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        status_tx.send_replace(ScanStatus::Scanning);
                        manager.sweep();
                        match manager.refresh().await {
                            Ok(report) => {
                                status_tx.send_replace(ScanStatus::Completed { report });
                            }
                            Err(e) => {
                                warn!(error = %e, "Scheduled refresh failed");
                                status_tx.send_replace(ScanStatus::Idle);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            status_tx.send_replace(ScanStatus::Stopped);
        });

        SchedulerHandle {
            manager: self.manager,
            shutdown: Some(shutdown_tx),
            join: Some(join),
            status: status_rx,
        }
    }
}

impl SchedulerHandle {
    /// Subscribe to status changes.
    pub fn status(&self) -> watch::Receiver<ScanStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> ScanStatus {
        self.status.borrow().clone()
    }

    /// Stop future scans and all live watching. Idempotent; a scan already
    /// running finishes its in-flight files.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.manager.stop();
    }

    /// Stop and wait for the scheduler task to exit.
    pub async fn shutdown(mut self) -> Result<(), EngineError> {
        self.stop();
        match self.join.take() {
            Some(join) => Ok(join.await?),
            None => Ok(()),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
