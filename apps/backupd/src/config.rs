use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use backup_core::orchestrator::{DEFAULT_PERIOD, DEFAULT_ROOT_NAME, default_sources};
use backup_core::{BackupPlan, SourceDir};
use drive_client::oauth::load_authorized_user;
use drive_client::{Credentials, DriveSettings};

pub const CONFIG_FILE_NAME: &str = "backupd.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub root_name: String,
    pub period_secs: u64,
    pub sources: Vec<SourceConfig>,
    pub scratch_dir: PathBuf,

    /// `authorized_user` JSON with a refresh token.
    pub credentials_path: Option<PathBuf>,
    /// Static bearer token; takes precedence over `credentials_path`.
    pub access_token: Option<String>,

    pub api_base_url: String,
    pub upload_base_url: String,
    pub token_url: String,
    pub resumable_threshold_bytes: u64,
    pub upload_chunk_bytes: usize,
    pub request_timeout_secs: u64,
    pub upload_attempts: u32,
    pub shutdown_grace_secs: u64,

    pub log_filter: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub archive_name: Option<String>,
}

impl SourceConfig {
    fn archive_name(&self) -> Option<String> {
        if let Some(name) = &self.archive_name {
            return Some(name.clone());
        }
        self.path
            .file_name()
            .map(|name| format!("{}.zip", name.to_string_lossy()))
    }
}

impl Default for Config {
    fn default() -> Self {
        let plan = BackupPlan::default();
        let drive = DriveSettings::default();
        Self {
            root_name: DEFAULT_ROOT_NAME.to_string(),
            period_secs: DEFAULT_PERIOD.as_secs(),
            sources: default_sources()
                .into_iter()
                .map(|source| SourceConfig {
                    path: source.path,
                    archive_name: Some(source.archive_name),
                })
                .collect(),
            scratch_dir: plan.scratch_dir,
            credentials_path: None,
            access_token: None,
            api_base_url: drive.api_base,
            upload_base_url: drive.upload_base,
            token_url: drive.token_url,
            resumable_threshold_bytes: drive.resumable_threshold,
            upload_chunk_bytes: drive.chunk_size,
            request_timeout_secs: drive.request_timeout.as_secs(),
            upload_attempts: plan.upload_attempts,
            shutdown_grace_secs: plan.shutdown_grace.as_secs(),
            log_filter: "info".to_string(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("drive-backup").join(CONFIG_FILE_NAME))
}

impl Config {
    /// An explicit path must exist; a missing file at the default location means defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.root_name.trim().is_empty() {
            bail!("root_name must not be empty");
        }
        if self.period_secs == 0 {
            bail!("period_secs must be at least 1");
        }
        if self.upload_attempts == 0 {
            bail!("upload_attempts must be at least 1");
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            let Some(name) = source.archive_name() else {
                bail!("source {} needs an archive_name", source.path.display());
            };
            if !names.insert(name.clone()) {
                bail!("archive_name {name} is used by more than one source");
            }
        }
        Ok(())
    }

    pub fn plan(&self) -> BackupPlan {
        BackupPlan {
            root_name: self.root_name.clone(),
            sources: self
                .sources
                .iter()
                .filter_map(|source| {
                    source
                        .archive_name()
                        .map(|name| SourceDir::new(source.path.clone(), name))
                })
                .collect(),
            period: Duration::from_secs(self.period_secs),
            scratch_dir: self.scratch_dir.clone(),
            upload_attempts: self.upload_attempts,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn drive_settings(&self) -> DriveSettings {
        DriveSettings {
            api_base: self.api_base_url.clone(),
            upload_base: self.upload_base_url.clone(),
            token_url: self.token_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            resumable_threshold: self.resumable_threshold_bytes,
            chunk_size: self.upload_chunk_bytes,
        }
    }

    pub async fn credentials(&self) -> anyhow::Result<Credentials> {
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Credentials::Bearer(token.to_string()));
        }
        let Some(path) = &self.credentials_path else {
            bail!("no credentials configured: set credentials_path or access_token");
        };
        let user = load_authorized_user(path).await?;
        Ok(Credentials::AuthorizedUser(user))
    }
}
