use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use tokio::sync::Notify;
use zip::ZipArchive;

use super::*;
use crate::archive::scratch_path;
use crate::errors::{StoreError, TriggerError};
use crate::store::{ContainerRef, ObjectRef, RemoteStore};

#[derive(Debug, Clone)]
struct StoredContainer {
    container: ContainerRef,
    parent: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    parent: String,
    name: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    containers: Vec<StoredContainer>,
    objects: Vec<StoredObject>,
    root_lookups: usize,
}

#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

#[derive(Default)]
struct MemoryStore {
    state: Mutex<MemoryState>,
    gate: Option<Gate>,
    fail_root: bool,
    fail_run: bool,
    fail_uploads_for: Vec<String>,
}

impl MemoryStore {
    fn gated() -> Self {
        Self {
            gate: Some(Gate::default()),
            ..Self::default()
        }
    }

    fn gate(&self) -> &Gate {
        self.gate.as_ref().unwrap()
    }

    fn containers(&self) -> Vec<StoredContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    fn objects(&self) -> Vec<StoredObject> {
        self.state.lock().unwrap().objects.clone()
    }

    fn root_lookups(&self) -> usize {
        self.state.lock().unwrap().root_lookups
    }

    fn insert_container(&self, name: &str, parent: Option<&str>) -> ContainerRef {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let container = ContainerRef {
            id: format!("c{}", state.next_id),
            name: name.to_string(),
        };
        state.containers.push(StoredContainer {
            container: container.clone(),
            parent: parent.map(str::to_string),
        });
        container
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn find_or_create_root(&self, name: &str) -> Result<ContainerRef, StoreError> {
        self.state.lock().unwrap().root_lookups += 1;
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_root {
            return Err(StoreError::Remote("listing refused".to_string()));
        }

        let existing = self
            .containers()
            .into_iter()
            .find(|stored| stored.parent.is_none() && stored.container.name == name);
        match existing {
            Some(stored) => Ok(stored.container),
            None => Ok(self.insert_container(name, None)),
        }
    }

    async fn create_dated_container(
        &self,
        parent: &ContainerRef,
        timestamp: DateTime<Local>,
    ) -> Result<ContainerRef, StoreError> {
        if self.fail_run {
            return Err(StoreError::Remote("folder creation refused".to_string()));
        }
        let name = crate::store::run_folder_name(&timestamp);
        Ok(self.insert_container(&name, Some(&parent.id)))
    }

    async fn upload_artifact(
        &self,
        parent: &ContainerRef,
        name: &str,
        local_file: &Path,
        _mime_type: &str,
    ) -> Result<ObjectRef, StoreError> {
        if self.fail_uploads_for.iter().any(|failing| failing == name) {
            return Err(StoreError::Remote(format!("upload of {name} rejected")));
        }
        let bytes = std::fs::read(local_file).map_err(|err| StoreError::Remote(err.to_string()))?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let object = ObjectRef {
            id: format!("o{}", state.next_id),
            name: name.to_string(),
        };
        state.objects.push(StoredObject {
            parent: parent.id.clone(),
            name: name.to_string(),
            bytes,
        });
        Ok(object)
    }
}

fn write(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn zip_entries(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = BTreeMap::new();
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).unwrap();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        entries.insert(entry.name().to_string(), contents);
    }
    entries
}

fn plan_for(server: &Path, names: &[&str]) -> BackupPlan {
    BackupPlan {
        sources: names
            .iter()
            .map(|name| SourceDir::new(server.join(name), format!("{name}.zip")))
            .collect(),
        scratch_dir: server.to_path_buf(),
        ..BackupPlan::default()
    }
}

fn fixed_clock() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn completed(outcome: PassOutcome) -> PassReport {
    match outcome {
        PassOutcome::Completed(report) => report,
        PassOutcome::Skipped => panic!("expected a completed pass"),
    }
}

async fn wait_for_report(orchestrator: &Orchestrator) -> PassReport {
    for _ in 0..200 {
        if let Some(report) = orchestrator.last_report() {
            if !orchestrator.is_running() {
                return report;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("backup pass did not finish");
}

#[tokio::test]
async fn pass_uploads_world_archive_into_dated_folder() {
    let server = tempfile::tempdir().unwrap();
    write(server.path(), "world/level.dat", b"level");
    write(server.path(), "world/region/r.0.0.mca", &[9u8; 4096]);

    let store = Arc::new(MemoryStore::default());
    let orchestrator = Orchestrator::new(plan_for(server.path(), &["world"]), store.clone())
        .with_clock(fixed_clock);

    let report = completed(orchestrator.run_now(Trigger::Manual).await);
    assert!(report.is_success());
    assert_eq!(report.trigger, Trigger::Manual);

    let containers = store.containers();
    assert_eq!(containers.len(), 2);
    let root = &containers[0];
    assert_eq!(root.container.name, DEFAULT_ROOT_NAME);
    assert_eq!(root.parent, None);
    let run = &containers[1];
    assert_eq!(run.container.name, "2024-01-01 00:00:00");
    assert_eq!(run.parent.as_deref(), Some(root.container.id.as_str()));
    assert_eq!(report.run_container.as_ref(), Some(&run.container));

    let objects = store.objects();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].name, "world.zip");
    assert_eq!(objects[0].parent, run.container.id);

    let entries = zip_entries(&objects[0].bytes);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["level.dat"], b"level");
    assert_eq!(entries["region/r.0.0.mca"], vec![9u8; 4096]);

    match &report.sources[0].outcome {
        SourceOutcome::Uploaded { files, bytes, .. } => {
            assert_eq!(*files, 2);
            assert_eq!(*bytes, 5 + 4096);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!scratch_path(server.path()).exists());
}

#[tokio::test]
async fn repeated_passes_reuse_the_root() {
    let server = tempfile::tempdir().unwrap();
    write(server.path(), "world/level.dat", b"level");

    let store = Arc::new(MemoryStore::default());
    let orchestrator = Orchestrator::new(plan_for(server.path(), &["world"]), store.clone());

    completed(orchestrator.run_now(Trigger::Schedule).await);
    completed(orchestrator.run_now(Trigger::Manual).await);

    let containers = store.containers();
    let roots: Vec<_> = containers.iter().filter(|c| c.parent.is_none()).collect();
    assert_eq!(roots.len(), 1);
    let runs = containers.iter().filter(|c| c.parent.is_some()).count();
    assert_eq!(runs, 2);
    assert_eq!(store.objects().len(), 2);
}

#[tokio::test]
async fn trigger_while_pass_running_is_dropped() {
    let server = tempfile::tempdir().unwrap();
    write(server.path(), "world/level.dat", b"level");

    let store = Arc::new(MemoryStore::gated());
    let orchestrator = Arc::new(Orchestrator::new(
        plan_for(server.path(), &["world"]),
        store.clone(),
    ));

    let first = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run_now(Trigger::Schedule).await }
    });
    store.gate().entered.notified().await;
    assert!(orchestrator.is_running());

    assert!(matches!(
        orchestrator.run_now(Trigger::Manual).await,
        PassOutcome::Skipped
    ));
    assert_eq!(store.root_lookups(), 1);

    store.gate().release.notify_one();
    let report = completed(first.await.unwrap());
    assert_eq!(report.trigger, Trigger::Schedule);
    assert!(!orchestrator.is_running());
    assert_eq!(store.containers().len(), 2);
    assert_eq!(store.objects().len(), 1);
}

#[tokio::test]
async fn held_permit_blocks_new_passes() {
    let server = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let orchestrator = Orchestrator::new(plan_for(server.path(), &["world"]), store.clone());

    let permit = orchestrator.try_begin().unwrap();
    assert!(orchestrator.try_begin().is_none());
    assert!(matches!(
        orchestrator.run_now(Trigger::Manual).await,
        PassOutcome::Skipped
    ));
    assert_eq!(store.root_lookups(), 0);

    drop(permit);
    assert!(orchestrator.try_begin().is_some());
}

#[tokio::test]
async fn shared_permit_holds_guard_until_last_copy_drops() {
    let server = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        plan_for(server.path(), &["world"]),
        Arc::new(MemoryStore::default()),
    );

    let permit = orchestrator.try_begin().unwrap();
    let held = permit.share();
    assert!(!held.is_orphaned());

    drop(permit);
    assert!(held.is_orphaned());
    assert!(orchestrator.is_running());
    assert!(orchestrator.try_begin().is_none());

    drop(held);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn archive_failure_does_not_stop_later_sources() {
    let server = tempfile::tempdir().unwrap();
    write(server.path(), "world_nether/DIM-1/level.dat", b"nether");
    write(server.path(), "world_the_end", b"not a directory");

    let store = Arc::new(MemoryStore::default());
    let orchestrator = Orchestrator::new(
        plan_for(server.path(), &["world", "world_the_end", "world_nether"]),
        store.clone(),
    );

    let report = completed(orchestrator.run_now(Trigger::Manual).await);
    assert!(!report.is_success());
    assert!(report.aborted.is_none());
    assert_eq!(report.sources.len(), 3);

    for failed in &report.sources[..2] {
        assert!(matches!(
            failed.outcome,
            SourceOutcome::Failed {
                step: PassStep::Archive,
                ..
            }
        ));
    }
    assert!(matches!(
        report.sources[2].outcome,
        SourceOutcome::Uploaded { .. }
    ));

    let objects = store.objects();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].name, "world_nether.zip");
    assert_eq!(zip_entries(&objects[0].bytes)["DIM-1/level.dat"], b"nether");
}

#[tokio::test]
async fn upload_failure_does_not_stop_later_sources() {
    let server = tempfile::tempdir().unwrap();
    write(server.path(), "world/level.dat", b"a");
    write(server.path(), "world_nether/level.dat", b"b");

    let store = Arc::new(MemoryStore {
        fail_uploads_for: vec!["world.zip".to_string()],
        ..MemoryStore::default()
    });
    let orchestrator = Orchestrator::new(
        plan_for(server.path(), &["world", "world_nether"]),
        store.clone(),
    );

    let report = completed(orchestrator.run_now(Trigger::Manual).await);
    match &report.sources[0].outcome {
        SourceOutcome::Failed { step, error } => {
            assert_eq!(*step, PassStep::Upload);
            assert!(error.contains("world.zip"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.uploaded().count(), 1);
    assert_eq!(store.objects()[0].name, "world_nether.zip");
    assert!(!scratch_path(server.path()).exists());
}

#[tokio::test]
async fn root_failure_aborts_without_uploading() {
    let server = tempfile::tempdir().unwrap();
    write(server.path(), "world/level.dat", b"level");

    let store = Arc::new(MemoryStore {
        fail_root: true,
        ..MemoryStore::default()
    });
    let orchestrator = Orchestrator::new(plan_for(server.path(), &["world"]), store.clone());

    let report = completed(orchestrator.run_now(Trigger::Schedule).await);
    assert!(report.aborted.as_deref().unwrap().contains("root"));
    assert!(report.sources.is_empty());
    assert!(report.run_container.is_none());
    assert!(store.containers().is_empty());
    assert!(store.objects().is_empty());
    assert!(!scratch_path(server.path()).exists());

    // The guard is released even when the pass aborts.
    assert!(orchestrator.try_begin().is_some());
    assert!(orchestrator.last_report().unwrap().aborted.is_some());
}

#[tokio::test]
async fn run_folder_failure_aborts_without_uploading() {
    let server = tempfile::tempdir().unwrap();
    write(server.path(), "world/level.dat", b"level");

    let store = Arc::new(MemoryStore {
        fail_run: true,
        ..MemoryStore::default()
    });
    let orchestrator = Orchestrator::new(plan_for(server.path(), &["world"]), store.clone())
        .with_clock(fixed_clock);

    let report = completed(orchestrator.run_now(Trigger::Manual).await);
    let aborted = report.aborted.as_deref().unwrap();
    assert!(aborted.contains("run"), "{aborted}");
    assert!(report.sources.is_empty());
    assert!(report.run_container.is_none());
    assert_eq!(store.root_lookups(), 1);
    assert_eq!(store.containers().len(), 1);
    assert!(store.objects().is_empty());
    assert!(!scratch_path(server.path()).exists());

    assert!(!orchestrator.is_running());
    assert!(orchestrator.try_begin().is_some());
}

#[tokio::test]
async fn scheduler_runs_immediately_and_rejects_overlapping_trigger() {
    let server = tempfile::tempdir().unwrap();
    write(server.path(), "world/level.dat", b"level");

    let store = Arc::new(MemoryStore::gated());
    let orchestrator = Arc::new(Orchestrator::new(
        plan_for(server.path(), &["world"]),
        store.clone(),
    ));
    let scheduler = spawn_scheduler(Arc::clone(&orchestrator));

    store.gate().entered.notified().await;
    assert_eq!(scheduler.run_now().await.unwrap_err(), TriggerError::AlreadyRunning);

    store.gate().release.notify_one();
    let first = wait_for_report(&orchestrator).await;
    assert_eq!(first.trigger, Trigger::Schedule);

    let manual = tokio::spawn({
        let store = store.clone();
        async move {
            store.gate().entered.notified().await;
            store.gate().release.notify_one();
        }
    });
    let report = scheduler.run_now().await.unwrap();
    manual.await.unwrap();
    assert_eq!(report.trigger, Trigger::Manual);
    assert_eq!(store.objects().len(), 2);

    scheduler.stop().await;
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn stop_aborts_pass_that_outlives_grace_period() {
    let server = tempfile::tempdir().unwrap();
    let mut plan = plan_for(server.path(), &["world"]);
    plan.shutdown_grace = Duration::from_millis(50);

    let store = Arc::new(MemoryStore::gated());
    let orchestrator = Arc::new(Orchestrator::new(plan, store.clone()));
    let scheduler = spawn_scheduler(Arc::clone(&orchestrator));

    store.gate().entered.notified().await;
    // Left behind by a pass that never got to clean up.
    std::fs::write(scratch_path(server.path()), b"partial").unwrap();
    scheduler.stop().await;

    assert!(!orchestrator.is_running());
    assert!(!scratch_path(server.path()).exists());
    assert!(orchestrator.last_report().is_none());
    assert!(store.containers().is_empty());
}
