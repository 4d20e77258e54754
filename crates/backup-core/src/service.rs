use std::sync::Arc;

use drive_client::{Credentials, DriveClient, DriveError, DriveSettings};
use tracing::info;

use crate::errors::TriggerError;
use crate::orchestrator::{spawn_scheduler, BackupPlan, Orchestrator, PassReport, SchedulerHandle};
use crate::store::{DriveStore, RemoteStore};

/// Authorizes against Drive and returns a store ready for use.
pub async fn connect_drive(
    settings: &DriveSettings,
    credentials: Credentials,
) -> Result<Arc<dyn RemoteStore>, DriveError> {
    let client = DriveClient::new(settings, credentials)?;
    client.authorize().await?;
    info!(api = %settings.api_base, "authorized drive client");
    Ok(Arc::new(DriveStore::new(Arc::new(client))))
}

/// A started backup schedule. Dropping it without `stop` also ends the loop.
pub struct BackupService {
    orchestrator: Arc<Orchestrator>,
    scheduler: SchedulerHandle,
}

impl BackupService {
    /// Must be called inside a tokio runtime; the first pass starts right away.
    pub fn start(plan: BackupPlan, store: Arc<dyn RemoteStore>) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(plan, store));
        let scheduler = spawn_scheduler(Arc::clone(&orchestrator));
        Self {
            orchestrator,
            scheduler,
        }
    }

    pub async fn run_now(&self) -> Result<PassReport, TriggerError> {
        self.scheduler.run_now().await
    }

    pub fn is_running(&self) -> bool {
        self.orchestrator.is_running()
    }

    pub fn last_report(&self) -> Option<PassReport> {
        self.orchestrator.last_report()
    }

    pub fn plan(&self) -> &BackupPlan {
        self.orchestrator.plan()
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }
}
