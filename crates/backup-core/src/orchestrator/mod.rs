mod plan;
mod report;
mod scheduler;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::archive::{archive_dir, scratch_path};
use crate::errors::{PassError, StoreError};
use crate::store::{ContainerRef, ObjectRef, RemoteStore, ZIP_MIME_TYPE};

pub use plan::{default_sources, BackupPlan, SourceDir, DEFAULT_PERIOD, DEFAULT_ROOT_NAME};
pub use report::{PassOutcome, PassReport, PassStep, SourceOutcome, SourceReport, Trigger};
pub use scheduler::{spawn_scheduler, SchedulerHandle};

const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Proof that the caller holds the single-flight guard. Shared copies keep the
/// guard held until the last one drops.
pub struct PassPermit {
    guard: Arc<OwnedMutexGuard<()>>,
}

impl PassPermit {
    pub(crate) fn share(&self) -> PassPermit {
        PassPermit {
            guard: Arc::clone(&self.guard),
        }
    }

    /// True once every other copy is gone, e.g. after the pass task was aborted.
    pub(crate) fn is_orphaned(&self) -> bool {
        Arc::strong_count(&self.guard) == 1
    }
}

/// Runs backup passes against a `RemoteStore`, at most one at a time.
pub struct Orchestrator {
    plan: BackupPlan,
    store: Arc<dyn RemoteStore>,
    pass_lock: Arc<Mutex<()>>,
    last_report: std::sync::Mutex<Option<PassReport>>,
    clock: Clock,
}

impl Orchestrator {
    pub fn new(plan: BackupPlan, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            plan,
            store,
            pass_lock: Arc::new(Mutex::new(())),
            last_report: std::sync::Mutex::new(None),
            clock: Arc::new(Local::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn plan(&self) -> &BackupPlan {
        &self.plan
    }

    /// Claims the guard without waiting. `None` means a pass is in flight.
    pub fn try_begin(&self) -> Option<PassPermit> {
        Arc::clone(&self.pass_lock)
            .try_lock_owned()
            .ok()
            .map(|guard| PassPermit {
                guard: Arc::new(guard),
            })
    }

    pub fn is_running(&self) -> bool {
        self.pass_lock.try_lock().is_err()
    }

    pub fn last_report(&self) -> Option<PassReport> {
        self.last_report
            .lock()
            .expect("report lock poisoned")
            .clone()
    }

    /// Runs a pass now if none is in flight; otherwise does nothing.
    pub async fn run_now(&self, trigger: Trigger) -> PassOutcome {
        match self.try_begin() {
            Some(permit) => PassOutcome::Completed(self.run_pass(permit, trigger).await),
            None => {
                info!(%trigger, "backup pass already running; trigger dropped");
                PassOutcome::Skipped
            }
        }
    }

    pub async fn run_pass(&self, permit: PassPermit, trigger: Trigger) -> PassReport {
        let started_at = (self.clock)();
        let mut report = PassReport::new(trigger, started_at);
        info!(%trigger, root = %self.plan.root_name, sources = self.plan.sources.len(), "starting backup pass");

        match self.resolve_run_container(started_at).await {
            Ok(run) => {
                for source in &self.plan.sources {
                    let outcome = self.backup_source(&permit, &run, source).await;
                    report.sources.push(SourceReport {
                        archive_name: source.archive_name.clone(),
                        path: source.path.clone(),
                        outcome,
                    });
                }
                report.run_container = Some(run);
            }
            Err(err) => {
                error!(error = %err, "backup pass aborted");
                report.aborted = Some(err.to_string());
            }
        }

        self.remove_scratch().await;
        report.finished_at = (self.clock)();

        let uploaded = report.uploaded().count();
        let failed = report.failed().count();
        if report.is_success() {
            info!(%trigger, uploaded, "backup pass finished");
        } else {
            warn!(%trigger, uploaded, failed, aborted = report.aborted.is_some(), "backup pass finished with failures");
        }

        *self.last_report.lock().expect("report lock poisoned") = Some(report.clone());
        drop(permit);
        report
    }

    async fn resolve_run_container(
        &self,
        timestamp: DateTime<Local>,
    ) -> Result<ContainerRef, PassError> {
        let root = self
            .store
            .find_or_create_root(&self.plan.root_name)
            .await
            .map_err(|source| PassError::ContainerResolution {
                step: "root",
                source,
            })?;
        let run = self
            .store
            .create_dated_container(&root, timestamp)
            .await
            .map_err(|source| PassError::ContainerResolution {
                step: "run",
                source,
            })?;
        info!(root = %root.id, run = %run.name, "created run folder");
        Ok(run)
    }

    async fn backup_source(
        &self,
        permit: &PassPermit,
        run: &ContainerRef,
        source: &SourceDir,
    ) -> SourceOutcome {
        let scratch = scratch_path(&self.plan.scratch_dir);

        // The blocking archiver outlives an aborted pass, so it holds the guard
        // until it is done with the scratch file.
        let (input, output, held) = (source.path.clone(), scratch.clone(), permit.share());
        let archived = tokio::task::spawn_blocking(move || {
            let result = archive_dir(&input, &output);
            if held.is_orphaned() {
                if let Err(err) = std::fs::remove_file(&output) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %output.display(), error = %err, "failed to remove scratch archive");
                    }
                }
            }
            result
        })
        .await;
        let summary = match archived {
            Ok(Ok(summary)) => summary,
            Ok(Err(err)) => {
                warn!(
                    source = %source.archive_name,
                    step = %PassStep::Archive,
                    path = %err.path().display(),
                    error = %err,
                    "skipping source"
                );
                return SourceOutcome::Failed {
                    step: PassStep::Archive,
                    error: err.to_string(),
                };
            }
            Err(err) => {
                warn!(source = %source.archive_name, step = %PassStep::Archive, error = %err, "archive task failed");
                return SourceOutcome::Failed {
                    step: PassStep::Archive,
                    error: format!("archive task failed: {err}"),
                };
            }
        };

        match self.upload_with_retries(run, &source.archive_name, &scratch).await {
            Ok(object) => {
                info!(
                    source = %source.archive_name,
                    id = %object.id,
                    files = summary.files,
                    bytes = summary.bytes,
                    "uploaded archive"
                );
                SourceOutcome::Uploaded {
                    object,
                    files: summary.files,
                    bytes: summary.bytes,
                }
            }
            Err(err) => {
                warn!(source = %source.archive_name, step = %PassStep::Upload, error = %err, "skipping source");
                SourceOutcome::Failed {
                    step: PassStep::Upload,
                    error: err.to_string(),
                }
            }
        }
    }

    async fn upload_with_retries(
        &self,
        run: &ContainerRef,
        name: &str,
        scratch: &Path,
    ) -> Result<ObjectRef, StoreError> {
        let attempts = self.plan.upload_attempts.max(1);
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match self
                .store
                .upload_artifact(run, name, scratch, ZIP_MIME_TYPE)
                .await
            {
                Ok(object) => return Ok(object),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    warn!(source = name, attempt, attempts, error = %err, "upload failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_MAX_DELAY);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn remove_scratch(&self) {
        let scratch = scratch_path(&self.plan.scratch_dir);
        match tokio::fs::remove_file(&scratch).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %scratch.display(), error = %err, "failed to remove scratch archive"),
        }
    }
}
