use serde::{Deserialize, Serialize};

pub type RequestId = u64;

/// Wire form of a finished backup pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassSummary {
    pub trigger: String,
    /// RFC 3339, local offset.
    pub started_at: String,
    pub finished_at: String,
    #[serde(default)]
    pub run_folder: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceSummary>,
    #[serde(default)]
    pub aborted: Option<String>,
}

impl PassSummary {
    pub fn is_success(&self) -> bool {
        self.aborted.is_none()
            && self
                .sources
                .iter()
                .all(|source| matches!(source.status, SourceStatus::Uploaded { .. }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    pub archive_name: String,
    pub path: String,
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", content = "data")]
pub enum SourceStatus {
    Uploaded { object_id: String, files: usize, bytes: u64 },
    Failed { step: String, error: String },
}
