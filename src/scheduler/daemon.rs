use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::JqsConfig;
use crate::error::{JqsError, Result};
use crate::launcher::Launcher;
use crate::resources::{Accountant, ResourceRequest, Usage};
use crate::store::{JobDir, JobState, StateStore};

/// How many consecutive ticks a failing item is retried before the log
/// level escalates.
const MAX_ITEM_RETRIES: u32 = 3;

/// The scheduling daemon: one logical actor observing the queue, admitting
/// jobs within the resource budget, and reaping terminated units.
pub struct Scheduler<L: Launcher> {
    store: StateStore,
    accountant: Accountant,
    launcher: L,
    tick: Duration,
    kill_grace: Duration,
    recovered: bool,
    /// Jobs whose unit has already been told to stop; avoids re-signalling
    /// every tick while the unit winds down.
    signalled: HashSet<u64>,
    /// Consecutive per-item failure counts for transient-error retries.
    retries: HashMap<u64, u32>,
}

impl<L: Launcher> Scheduler<L> {
    pub fn new(store: StateStore, accountant: Accountant, launcher: L, config: &JqsConfig) -> Self {
        Self {
            store,
            accountant,
            launcher,
            tick: config.tick,
            kill_grace: config.kill_grace,
            recovered: false,
            signalled: HashSet::new(),
            retries: HashMap::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run ticks until the token is cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("scheduler shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }
    }

    /// One full scheduling pass. Per-job errors are logged and retried on
    /// later ticks; nothing here aborts the tick.
    pub async fn tick_once(&mut self) {
        if !self.recovered {
            if let Err(e) = self.recover_pass().await {
                tracing::error!(error = %e, "recovery pass failed; retrying next tick");
                return;
            }
            self.recovered = true;
        }

        self.cancel_queued();
        self.cancel_running().await;
        self.admit().await;
        self.reap().await;
        self.enforce_time_limits().await;
    }

    /// First-tick recovery: clean up interrupted moves, finalize units that
    /// did not survive the restart, and resync the usage accounting.
    async fn recover_pass(&mut self) -> Result<()> {
        self.store.recover()?;

        let now = now_unix();
        for entry in self.store.scan(JobDir::Running)? {
            let record = match entry.result {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(jobid = entry.jobid, error = %e, "corrupt record in running/; quarantining");
                    self.store.quarantine(JobDir::Running, entry.jobid, now)?;
                    continue;
                }
            };

            let handle = record
                .supervisor_handle
                .clone()
                .unwrap_or_else(|| self.launcher.handle(record.jobid));
            let alive = self.launcher.alive(&handle).await.unwrap_or(false);
            if !alive {
                tracing::warn!(jobid = record.jobid, unit = %handle, "unit did not survive restart");
                self.store
                    .transfer(record.jobid, JobDir::Running, JobDir::Finished, |r| {
                        r.state = JobState::Failed;
                        r.end_time = Some(now);
                        r.reason = Some("OrphanedOnRestart".to_string());
                    })?;
            }
        }

        // Rebuild usage.json from what actually survived. This also repairs
        // a reservation leaked by a crash between reserve and move.
        let mut usage = Usage::default();
        for entry in self.store.scan(JobDir::Running)? {
            if let Ok(record) = entry.result {
                usage.cores_used += record.cores;
                usage.mem_mb_used += record.mem_mb;
            }
        }
        let guard = self.accountant.lock()?;
        self.accountant.set_usage(&guard, usage)?;
        drop(guard);

        tracing::info!(
            cores_used = usage.cores_used,
            mem_mb_used = usage.mem_mb_used,
            "recovery pass complete"
        );
        Ok(())
    }

    /// Queued jobs with a pending cancellation go straight to finished.
    fn cancel_queued(&mut self) {
        let entries = match self.store.scan(JobDir::Queue) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "cannot scan queue/");
                return;
            }
        };
        for entry in entries {
            let jobid = entry.jobid;
            match entry.result {
                Err(e) => self.quarantine_corrupt(JobDir::Queue, jobid, &e),
                Ok(record) if record.cancel_requested => {
                    let outcome =
                        self.store
                            .transfer(jobid, JobDir::Queue, JobDir::Finished, |r| {
                                r.state = JobState::Cancelled;
                                r.end_time = Some(now_unix());
                            });
                    match outcome {
                        Ok(_) => {
                            tracing::info!(jobid, "queued job cancelled");
                            self.note_success(jobid);
                        }
                        Err(e) => self.note_failure(jobid, "cancel queued", &e),
                    }
                }
                Ok(_) => {}
            }
        }
    }

    /// Running jobs with a pending cancellation get their unit stopped;
    /// reap picks up the exit.
    async fn cancel_running(&mut self) {
        let entries = match self.store.scan(JobDir::Running) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "cannot scan running/");
                return;
            }
        };
        for entry in entries {
            let record = match entry.result {
                Ok(record) => record,
                Err(_) => continue, // reap quarantines corrupt running records
            };
            if !record.cancel_requested || self.signalled.contains(&record.jobid) {
                continue;
            }
            let handle = record
                .supervisor_handle
                .clone()
                .unwrap_or_else(|| self.launcher.handle(record.jobid));
            match self.launcher.terminate(&handle, self.kill_grace).await {
                Ok(()) => {
                    tracing::info!(jobid = record.jobid, unit = %handle, "termination requested");
                    self.signalled.insert(record.jobid);
                }
                Err(e) => self.note_failure(record.jobid, "terminate", &e),
            }
        }
    }

    /// Walk the queue in jobid order and admit everything that fits.
    /// A head-of-queue job that does not fit is skipped, not a barrier:
    /// later smaller jobs may backfill.
    async fn admit(&mut self) {
        let limits = match self.accountant.limits() {
            Ok(limits) => limits,
            Err(e) => {
                tracing::error!(error = %e, "cannot read limits.json; skipping admission");
                return;
            }
        };

        let entries = match self.store.scan(JobDir::Queue) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "cannot scan queue/");
                return;
            }
        };

        for entry in entries {
            let jobid = entry.jobid;
            let record = match entry.result {
                Ok(record) => record,
                Err(e) => {
                    self.quarantine_corrupt(JobDir::Queue, jobid, &e);
                    continue;
                }
            };
            if record.cancel_requested {
                continue; // next tick's cancel phase takes it
            }

            let req = record.request();
            if Accountant::oversized(&limits, &req) {
                tracing::warn!(
                    jobid,
                    cores = req.cores,
                    mem_mb = req.mem_mb,
                    "request can never fit this node"
                );
                let outcome = self
                    .store
                    .transfer(jobid, JobDir::Queue, JobDir::Finished, |r| {
                        r.state = JobState::Failed;
                        r.end_time = Some(now_unix());
                        r.reason = Some("OversizedRequest".to_string());
                    });
                if let Err(e) = outcome {
                    self.note_failure(jobid, "finalize oversized", &e);
                }
                continue;
            }

            match self.try_admit(jobid, &req).await {
                Ok(true) => self.note_success(jobid),
                Ok(false) => {} // does not fit right now; keep scanning (backfill)
                Err(e) => self.note_failure(jobid, "admit", &e),
            }
        }
    }

    /// The admission critical section: check, reserve and move under
    /// `resources.lock`, then launch with the lock released.
    async fn try_admit(&mut self, jobid: u64, req: &ResourceRequest) -> Result<bool> {
        let guard = self.accountant.lock()?;
        if !self.accountant.fits(&guard, req)? {
            return Ok(false);
        }
        self.accountant.reserve(&guard, req)?;
        let moved = self
            .store
            .transfer(jobid, JobDir::Queue, JobDir::Running, |r| {
                r.state = JobState::Running;
                r.start_time = Some(now_unix());
            });
        let record = match moved {
            Ok(record) => record,
            Err(e) => {
                // The reservation must not outlive the failed move.
                self.accountant.release(&guard, req)?;
                return Err(e);
            }
        };
        drop(guard);

        match self.launcher.launch(&record).await {
            Ok(handle) => {
                self.store.update(JobDir::Running, jobid, |r| {
                    r.supervisor_handle = Some(handle.clone());
                })?;
                tracing::info!(jobid, unit = %handle, cores = req.cores, mem_mb = req.mem_mb, "job admitted");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(jobid, error = %e, "launch failed");
                let guard = self.accountant.lock()?;
                self.accountant.release(&guard, req)?;
                drop(guard);
                self.store
                    .transfer(jobid, JobDir::Running, JobDir::Finished, |r| {
                        r.state = JobState::Failed;
                        r.end_time = Some(now_unix());
                        r.reason = Some("LaunchError".to_string());
                    })?;
                Ok(true) // handled; do not re-admit
            }
        }
    }

    /// Collect exits: move terminated units to finished and release their
    /// reservations.
    async fn reap(&mut self) {
        let entries = match self.store.scan(JobDir::Running) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "cannot scan running/");
                return;
            }
        };

        for entry in entries {
            let jobid = entry.jobid;
            let record = match entry.result {
                Err(e) => {
                    // Unknown request size: quarantine without a release and
                    // let the operator reconcile usage.
                    self.quarantine_corrupt(JobDir::Running, jobid, &e);
                    self.signalled.remove(&jobid);
                    continue;
                }
                Ok(record) => record,
            };

            let handle = record
                .supervisor_handle
                .clone()
                .unwrap_or_else(|| self.launcher.handle(jobid));
            let code = match self.launcher.exit_code(&handle).await {
                Ok(None) => continue,
                Ok(Some(code)) => code,
                Err(e) => {
                    self.note_failure(jobid, "probe unit", &e);
                    continue;
                }
            };

            let state = if record.cancel_requested {
                JobState::Cancelled
            } else if code == 0 {
                JobState::Finished
            } else {
                JobState::Failed
            };

            let outcome = self
                .store
                .transfer(jobid, JobDir::Running, JobDir::Finished, |r| {
                    r.state = state;
                    r.exit_code = Some(code);
                    r.end_time = Some(now_unix());
                });
            match outcome {
                Ok(_) => {
                    let released = self
                        .accountant
                        .lock()
                        .and_then(|guard| self.accountant.release(&guard, &record.request()));
                    if let Err(e) = released {
                        tracing::error!(jobid, error = %e, "failed to release resources");
                    }
                    self.signalled.remove(&jobid);
                    self.note_success(jobid);
                    tracing::info!(jobid, state = %state, exit_code = code, "job reaped");
                }
                Err(e) => self.note_failure(jobid, "reap", &e),
            }
        }
    }

    /// Scheduler-enforced time limits: overdue jobs are cancelled through
    /// the normal cancellation path.
    async fn enforce_time_limits(&mut self) {
        let entries = match self.store.scan(JobDir::Running) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "cannot scan running/");
                return;
            }
        };
        let now = now_unix();

        for entry in entries {
            let record = match entry.result {
                Ok(record) => record,
                Err(_) => continue,
            };
            let (Some(limit), Some(start)) = (record.time_limit_sec, record.start_time) else {
                continue;
            };
            if record.cancel_requested || now - start <= limit as i64 {
                continue;
            }

            tracing::warn!(
                jobid = record.jobid,
                limit_sec = limit,
                "time limit exceeded; cancelling"
            );
            let marked = self.store.update(JobDir::Running, record.jobid, |r| {
                r.cancel_requested = true;
                r.reason = Some("TimeLimitExceeded".to_string());
            });
            if let Err(e) = marked {
                self.note_failure(record.jobid, "mark overdue", &e);
                continue;
            }
            let handle = record
                .supervisor_handle
                .clone()
                .unwrap_or_else(|| self.launcher.handle(record.jobid));
            match self.launcher.terminate(&handle, self.kill_grace).await {
                Ok(()) => {
                    self.signalled.insert(record.jobid);
                }
                Err(e) => self.note_failure(record.jobid, "terminate overdue", &e),
            }
        }
    }

    fn quarantine_corrupt(&mut self, dir: JobDir, jobid: u64, cause: &JqsError) {
        tracing::error!(jobid, dir = %dir, error = %cause, "corrupt record; quarantining");
        if let Err(e) = self.store.quarantine(dir, jobid, now_unix()) {
            self.note_failure(jobid, "quarantine", &e);
        } else {
            self.note_success(jobid);
        }
    }

    fn note_success(&mut self, jobid: u64) {
        self.retries.remove(&jobid);
    }

    fn note_failure(&mut self, jobid: u64, action: &str, error: &JqsError) {
        let count = self.retries.entry(jobid).or_insert(0);
        *count += 1;
        if *count <= MAX_ITEM_RETRIES {
            tracing::warn!(jobid, action, attempt = *count, error = %error, "job action failed; will retry");
        } else {
            tracing::error!(jobid, action, attempts = *count, error = %error, "job action keeps failing");
        }
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
