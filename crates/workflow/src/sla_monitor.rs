//! Background SLA breach scanner.
//!
//! [`SlaMonitor`] is an owned task started by the composition root. Each
//! tick (the first fires immediately) flags open incidents whose deadline
//! has passed. Flagging is idempotent, so a repeated scan with nothing new
//! overdue changes nothing. Cancellation is checked only between scans, so
//! a scan in progress always finishes its update.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use triage_core::types::{DbId, Timestamp};
use triage_db::models::incident::SlaStatistics;

use crate::config::SlaMonitorConfig;
use crate::store::{IncidentStore, StoreResult};

/// Source of "now" for deadline comparisons.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// What one scan did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaScanReport {
    /// Incidents found overdue and not yet flagged.
    pub overdue: usize,
    /// Incidents this scan flagged.
    pub marked: u64,
    /// `None` when the statistics query failed.
    pub statistics: Option<SlaStatistics>,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningTask {
    /// A cancelled task counts as stopped even while it finishes its last scan.
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

pub struct SlaMonitor {
    incidents: Arc<dyn IncidentStore>,
    clock: Arc<dyn Clock>,
    config: SlaMonitorConfig,
    running: Mutex<Option<RunningTask>>,
}

impl SlaMonitor {
    pub fn new(
        incidents: Arc<dyn IncidentStore>,
        clock: Arc<dyn Clock>,
        config: SlaMonitorConfig,
    ) -> Self {
        Self {
            incidents,
            clock,
            config,
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningTask>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the scan loop as a child of `parent`.
    ///
    /// Returns `false` (and does nothing) if the loop is already running.
    /// A loop that was stopped but has not exited yet is detached and
    /// replaced.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> bool {
        let mut running = self.running();
        if running.as_ref().is_some_and(RunningTask::is_live) {
            return false;
        }

        let cancel = parent.child_token();
        let monitor = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { monitor.run(token).await });
        *running = Some(RunningTask { cancel, handle });

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            "SLA monitor started"
        );
        true
    }

    /// Signal the loop to stop after any scan in progress. Never blocks.
    ///
    /// Returns `false` if the loop was not running.
    pub fn stop(&self) -> bool {
        match self.running().as_ref() {
            Some(task) if task.is_live() => {
                task.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running().as_ref().is_some_and(RunningTask::is_live)
    }

    /// Stop the loop and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` if the loop did not exit in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let Some(task) = self.running().take() else {
            return true;
        };
        task.cancel.cancel();
        match tokio::time::timeout(timeout, task.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "SLA monitor task panicked");
                true
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "SLA monitor did not stop in time"
                );
                false
            }
        }
    }

    async fn run(&self, cancel: CancellationToken) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("SLA monitor stopping");
                    break;
                }
                _ = interval.tick() => {}
            }

            if let Err(e) = self.scan_once().await {
                tracing::error!(error = %e, "SLA scan failed");
            }
        }
    }

    /// Run one scan now.
    pub async fn scan_once(&self) -> StoreResult<SlaScanReport> {
        let now = self.clock.now();
        let overdue = self.incidents.find_sla_overdue(now).await?;
        let ids: Vec<DbId> = overdue.iter().map(|i| i.id).collect();
        let marked = self.incidents.mark_sla_breached(&ids).await?;

        for incident in &overdue {
            tracing::debug!(
                incident_id = incident.id,
                incident_number = %incident.incident_number,
                deadline = ?incident.sla_deadline,
                "SLA breached"
            );
        }
        if marked > 0 {
            tracing::info!(marked, "Marked incidents as SLA breached");
        }

        let statistics = match self.incidents.sla_statistics().await {
            Ok(stats) => {
                tracing::info!(
                    open = stats.open,
                    in_progress = stats.in_progress,
                    breached = stats.breached,
                    "SLA statistics"
                );
                Some(stats)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compute SLA statistics");
                None
            }
        };

        Ok(SlaScanReport {
            overdue: overdue.len(),
            marked,
            statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::memory::{fixtures, FailPoint, MemoryStore};

    struct ManualClock(Mutex<Timestamp>);

    impl ManualClock {
        fn at(now: Timestamp) -> Arc<Self> {
            Arc::new(Self(Mutex::new(now)))
        }

        fn advance(&self, by: ChronoDuration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            *self.0.lock().unwrap()
        }
    }

    fn monitor(store: &Arc<MemoryStore>, clock: Arc<ManualClock>) -> Arc<SlaMonitor> {
        Arc::new(SlaMonitor::new(
            store.clone(),
            clock,
            SlaMonitorConfig {
                interval: Duration::from_secs(60),
            },
        ))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn scan_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        let incident = fixtures::open_incident(&store, &flow).await.unwrap();
        let clock = ManualClock::at(Utc::now());
        let monitor = monitor(&store, clock.clone());

        let first = monitor.scan_once().await.unwrap();
        assert_eq!(first.marked, 0);

        clock.advance(ChronoDuration::hours(25));
        let second = monitor.scan_once().await.unwrap();
        assert_eq!(second.overdue, 1);
        assert_eq!(second.marked, 1);
        assert!(store.incident(incident.id).unwrap().sla_breached);

        let third = monitor.scan_once().await.unwrap();
        assert_eq!(third.overdue, 0);
        assert_eq!(third.marked, 0);
        assert_eq!(third.statistics.unwrap().breached, 1);
    }

    #[tokio::test]
    async fn closed_and_deadline_free_incidents_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        let mut closed = fixtures::open_incident(&store, &flow).await.unwrap();
        closed.closed_at = Some(Utc::now());
        store.put_incident(closed.clone());
        let mut no_sla = fixtures::open_incident(&store, &flow).await.unwrap();
        no_sla.sla_deadline = None;
        store.put_incident(no_sla);

        let clock = ManualClock::at(Utc::now() + ChronoDuration::days(30));
        let report = monitor(&store, clock).scan_once().await.unwrap();
        assert_eq!(report.marked, 0);
        assert!(!store.incident(closed.id).unwrap().sla_breached);
    }

    #[tokio::test]
    async fn statistics_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        fixtures::open_incident(&store, &flow).await.unwrap();
        store.fail_on(FailPoint::SlaStatistics);

        let clock = ManualClock::at(Utc::now() + ChronoDuration::hours(25));
        let report = monitor(&store, clock).scan_once().await.unwrap();
        assert_eq!(report.marked, 1);
        assert!(report.statistics.is_none());
    }

    #[tokio::test]
    async fn statistics_count_by_state_type() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        fixtures::open_incident(&store, &flow).await.unwrap();
        let mut working = fixtures::open_incident(&store, &flow).await.unwrap();
        working.current_state_id = flow.in_progress.id;
        store.put_incident(working);

        let report = monitor(&store, ManualClock::at(Utc::now()))
            .scan_once()
            .await
            .unwrap();
        assert_eq!(
            report.statistics,
            Some(SlaStatistics {
                open: 1,
                in_progress: 1,
                breached: 0
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_scans_immediately_then_every_interval() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        let first = fixtures::open_incident(&store, &flow).await.unwrap();
        let clock = ManualClock::at(Utc::now() + ChronoDuration::hours(25));
        let monitor = monitor(&store, clock.clone());
        let root = CancellationToken::new();

        assert!(monitor.start(&root));
        assert!(!monitor.start(&root));
        settle().await;
        assert!(store.incident(first.id).unwrap().sla_breached);

        let second = fixtures::open_incident(&store, &flow).await.unwrap();
        clock.advance(ChronoDuration::hours(25));
        settle().await;
        assert!(!store.incident(second.id).unwrap().sla_breached);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.incident(second.id).unwrap().sla_breached);

        assert!(monitor.stop());
        assert!(!monitor.stop());
        settle().await;
        assert!(!monitor.is_running());
        assert!(monitor.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_and_restart_is_allowed() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(&store, ManualClock::at(Utc::now()));
        let root = CancellationToken::new();

        assert!(monitor.start(&root));
        settle().await;
        assert!(monitor.is_running());

        root.cancel();
        settle().await;
        assert!(!monitor.is_running());

        let fresh = CancellationToken::new();
        assert!(monitor.start(&fresh));
        assert!(monitor.shutdown(Duration::from_secs(1)).await);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn start_right_after_stop_runs_again() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        let clock = ManualClock::at(Utc::now());
        let monitor = monitor(&store, clock.clone());
        let root = CancellationToken::new();

        assert!(monitor.start(&root));
        settle().await;
        assert!(monitor.stop());
        assert!(monitor.start(&root));
        settle().await;
        assert!(monitor.is_running());

        let incident = fixtures::open_incident(&store, &flow).await.unwrap();
        clock.advance(ChronoDuration::hours(25));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.incident(incident.id).unwrap().sla_breached);

        assert!(monitor.shutdown(Duration::from_secs(1)).await);
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn shutdown_when_never_started_is_immediate() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(&store, ManualClock::at(Utc::now()));
        assert!(!monitor.stop());
        assert!(monitor.shutdown(Duration::from_millis(10)).await);
    }
}
