pub mod archive;
pub mod errors;
pub mod orchestrator;
pub mod service;
pub mod store;

pub use archive::{archive_dir, ArchiveSummary};
pub use errors::{ArchiveError, PassError, StoreError, TriggerError};
pub use orchestrator::{
    BackupPlan, Orchestrator, PassOutcome, PassReport, PassStep, SourceDir, SourceOutcome,
    SourceReport, Trigger,
};
pub use service::{connect_drive, BackupService};
pub use store::{ContainerRef, DriveStore, ObjectRef, RemoteStore};
