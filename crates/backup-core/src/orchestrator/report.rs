use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::store::{ContainerRef, ObjectRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Schedule,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Schedule => f.write_str("schedule"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassStep {
    Archive,
    Upload,
}

impl fmt::Display for PassStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassStep::Archive => f.write_str("archive"),
            PassStep::Upload => f.write_str("upload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Uploaded {
        object: ObjectRef,
        files: usize,
        bytes: u64,
    },
    Failed {
        step: PassStep,
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub archive_name: String,
    pub path: PathBuf,
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub trigger: Trigger,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub run_container: Option<ContainerRef>,
    pub sources: Vec<SourceReport>,
    /// Set when no destination could be resolved and no source was attempted.
    pub aborted: Option<String>,
}

impl PassReport {
    pub(crate) fn new(trigger: Trigger, started_at: DateTime<Local>) -> Self {
        Self {
            trigger,
            started_at,
            finished_at: started_at,
            run_container: None,
            sources: Vec::new(),
            aborted: None,
        }
    }

    pub fn uploaded(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|source| matches!(source.outcome, SourceOutcome::Uploaded { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|source| matches!(source.outcome, SourceOutcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failed().next().is_none()
    }
}

#[derive(Debug, Clone)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass held the guard; nothing was done.
    Skipped,
}
