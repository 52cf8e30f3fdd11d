//! Build Scheduler
//!
//! Periodically turns WAL segments that have aged out into index files.

use crate::index::manager::{BuildReport, TsdbManager};
use crate::storage::wal::{list_wals, remove_wals, WalIdentifier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Timing of scheduled builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Time between build passes
    pub build_interval: Duration,
    /// Segments younger than this are left for a later pass
    pub min_wal_age: Duration,
    /// A pass running longer than this counts as failed
    pub build_timeout: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            build_interval: Duration::from_secs(60),
            min_wal_age: Duration::from_secs(15 * 60),
            build_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Result of one scheduled pass
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PassOutcome {
    /// No segment was old enough
    Idle,
    /// The previous pass is still running on the blocking pool
    Busy,
    Built {
        wals: usize,
        report: BuildReport,
    },
    Failed {
        wals: usize,
        error: String,
        registered: Vec<String>,
    },
    TimedOut {
        wals: usize,
    },
}

/// Clears the in-flight flag when a blocking build finishes, even on panic
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives [`TsdbManager::build_from_wals`] on a timer
pub struct BuildScheduler {
    manager: Arc<TsdbManager>,
    config: ScheduleConfig,
    running: Arc<RwLock<bool>>,
    in_flight: Arc<AtomicBool>,
    last_outcome: Arc<RwLock<Option<(DateTime<Utc>, PassOutcome)>>>,
}

impl BuildScheduler {
    pub fn new(manager: Arc<TsdbManager>, config: ScheduleConfig) -> Self {
        Self {
            manager,
            config,
            running: Arc::new(RwLock::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            last_outcome: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// When the last pass ran and how it ended
    pub async fn last_outcome(&self) -> Option<(DateTime<Utc>, PassOutcome)> {
        self.last_outcome.read().await.clone()
    }

    /// Start the scheduler background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();

        tokio::spawn(async move {
            *scheduler.running.write().await = true;

            let mut interval = tokio::time::interval(scheduler.config.build_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if !*scheduler.running.read().await {
                    break;
                }

                scheduler.run_once(Utc::now()).await;
            }
        })
    }

    /// Stop the scheduler after its current tick
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Segments under the manager's directory old enough to build at `now`
    pub fn due_wals(&self, now: DateTime<Utc>) -> crate::storage::TsdbResult<Vec<WalIdentifier>> {
        let min_age = chrono::Duration::from_std(self.config.min_wal_age)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = now - min_age;

        Ok(list_wals(self.manager.dir())?
            .into_iter()
            .filter(|id| id.ts() <= cutoff)
            .collect())
    }

    /// Run one build pass as of `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> PassOutcome {
        let outcome = self.run_pass(now).await;

        match &outcome {
            PassOutcome::Idle => tracing::debug!("no WAL segments due for indexing"),
            PassOutcome::Busy => tracing::warn!("previous build still running, skipping tick"),
            PassOutcome::Built { wals, report } => tracing::info!(
                wals,
                periods = report.periods.len(),
                series = report.series,
                "built index files from WALs"
            ),
            PassOutcome::Failed { wals, error, .. } => {
                tracing::error!(wals, error = %error, "scheduled build failed, keeping WALs")
            }
            PassOutcome::TimedOut { wals } => tracing::error!(
                wals,
                timeout = ?self.config.build_timeout,
                "scheduled build timed out, keeping WALs"
            ),
        }

        *self.last_outcome.write().await = Some((now, outcome.clone()));
        outcome
    }

    async fn run_pass(&self, now: DateTime<Utc>) -> PassOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return PassOutcome::Busy;
        }
        let guard = InFlight(self.in_flight.clone());

        let ids = match self.due_wals(now) {
            Ok(ids) => ids,
            Err(e) => {
                return PassOutcome::Failed {
                    wals: 0,
                    error: e.to_string(),
                    registered: Vec::new(),
                }
            }
        };
        if ids.is_empty() {
            return PassOutcome::Idle;
        }
        let wals = ids.len();

        let manager = self.manager.clone();
        let build_ids = ids.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            manager.build_from_wals(now, &build_ids)
        });

        match tokio::time::timeout(self.config.build_timeout, task).await {
            Err(_) => PassOutcome::TimedOut { wals },
            Ok(Err(join)) => PassOutcome::Failed {
                wals,
                error: join.to_string(),
                registered: Vec::new(),
            },
            Ok(Ok(Err(failure))) => PassOutcome::Failed {
                wals,
                error: failure.to_string(),
                registered: failure.registered,
            },
            Ok(Ok(Ok(report))) => {
                if let Err(e) = remove_wals(self.manager.dir(), &ids) {
                    tracing::warn!(error = %e, "failed to remove indexed WAL segments");
                }
                PassOutcome::Built { wals, report }
            }
        }
    }
}
