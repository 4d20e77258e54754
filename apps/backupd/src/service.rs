use std::sync::Arc;

use tracing::{error, info};

use backup_core::{BackupPlan, BackupService, PassReport, RemoteStore, TriggerError, connect_drive};
use backup_proto::ControlError;
use backup_proto::proto::BackupStatus;

use crate::config::Config;
use crate::daemon::pass_summary;

/// Backups as seen by the daemon: running, or disabled with a reason.
pub struct BackupHost {
    plan: BackupPlan,
    service: Option<BackupService>,
    disabled_reason: Option<String>,
}

pub async fn authorize(config: &Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    let credentials = config.credentials().await?;
    Ok(connect_drive(&config.drive_settings(), credentials).await?)
}

impl BackupHost {
    /// Never fails: an authorization problem leaves backups disabled while the daemon keeps serving.
    pub async fn start(config: &Config) -> Self {
        let plan = config.plan();
        match authorize(config).await {
            Ok(store) => Self::enabled(plan, store),
            Err(err) => {
                let reason = format!("{err:#}");
                error!(error = %reason, "drive authorization failed; backups disabled");
                Self::disabled(plan, reason)
            }
        }
    }

    pub fn enabled(plan: BackupPlan, store: Arc<dyn RemoteStore>) -> Self {
        info!(
            root = %plan.root_name,
            period_secs = plan.period.as_secs(),
            sources = plan.sources.len(),
            "periodic backups enabled"
        );
        Self {
            service: Some(BackupService::start(plan.clone(), store)),
            plan,
            disabled_reason: None,
        }
    }

    pub fn disabled(plan: BackupPlan, reason: impl Into<String>) -> Self {
        Self {
            plan,
            service: None,
            disabled_reason: Some(reason.into()),
        }
    }

    pub async fn run_now(&self) -> Result<PassReport, ControlError> {
        let Some(service) = &self.service else {
            return Err(ControlError::BackupsDisabled(self.reason()));
        };
        service.run_now().await.map_err(|err| match err {
            TriggerError::AlreadyRunning => ControlError::BackupInProgress,
            TriggerError::Stopped => ControlError::BackupsDisabled(err.to_string()),
        })
    }

    pub fn status(&self) -> BackupStatus {
        let service = self.service.as_ref();
        BackupStatus {
            enabled: service.is_some_and(|service| !service.is_stopped()),
            running: service.is_some_and(BackupService::is_running),
            root_name: self.plan.root_name.clone(),
            period_secs: self.plan.period.as_secs(),
            disabled_reason: self.disabled_reason.clone(),
            last_pass: service
                .and_then(BackupService::last_report)
                .as_ref()
                .map(pass_summary),
        }
    }

    pub async fn stop(&self) {
        if let Some(service) = &self.service {
            service.stop().await;
        }
    }

    fn reason(&self) -> String {
        self.disabled_reason
            .clone()
            .unwrap_or_else(|| "not configured".to_string())
    }
}
