use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use drive_client::drive::folder_by_name_query;
use drive_client::{DriveClient, DriveFile, FOLDER_MIME_TYPE};
use tracing::{debug, info, warn};

use super::{run_folder_name, ContainerRef, ObjectRef, RemoteStore};
use crate::errors::StoreError;

/// `RemoteStore` backed by Google Drive folders and files.
pub struct DriveStore {
    client: Arc<DriveClient>,
}

impl DriveStore {
    pub fn new(client: Arc<DriveClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteStore for DriveStore {
    async fn find_or_create_root(&self, name: &str) -> Result<ContainerRef, StoreError> {
        let query = folder_by_name_query(name, None);
        let candidates = self.client.list_files(&query, Some("createdTime")).await?;
        if let Some(root) = select_root(name, &candidates) {
            debug!(id = %root.id, name, "using existing root folder");
            return Ok(root);
        }

        let folder = self.client.create_folder(name, None).await?;
        info!(id = %folder.id, name, "created root folder");
        Ok(container(folder, name))
    }

    async fn create_dated_container(
        &self,
        parent: &ContainerRef,
        timestamp: DateTime<Local>,
    ) -> Result<ContainerRef, StoreError> {
        let name = run_folder_name(&timestamp);
        let folder = self.client.create_folder(&name, Some(&parent.id)).await?;
        Ok(container(folder, &name))
    }

    async fn upload_artifact(
        &self,
        parent: &ContainerRef,
        name: &str,
        local_file: &Path,
        mime_type: &str,
    ) -> Result<ObjectRef, StoreError> {
        let file = self
            .client
            .upload_file(name, &parent.id, local_file, mime_type)
            .await?;
        Ok(ObjectRef {
            id: file.id,
            name: if file.name.is_empty() {
                name.to_string()
            } else {
                file.name
            },
        })
    }
}

/// Picks the root folder among listing results.
///
/// Only exact-name folders qualify. When several exist the earliest created one
/// wins so repeated lookups keep resolving to the same folder.
pub fn select_root(name: &str, candidates: &[DriveFile]) -> Option<ContainerRef> {
    let mut matches: Vec<&DriveFile> = candidates
        .iter()
        .filter(|file| file.name == name)
        .filter(|file| {
            file.mime_type
                .as_deref()
                .map_or(true, |mime| mime == FOLDER_MIME_TYPE)
        })
        .collect();

    // createdTime is RFC 3339 in UTC, so string order is chronological.
    matches.sort_by_key(|file| (file.created_time.is_none(), file.created_time.clone()));

    if matches.len() > 1 {
        warn!(
            name,
            count = matches.len(),
            chosen = %matches[0].id,
            "multiple root folders share this name; using the earliest created"
        );
    }

    matches.first().map(|file| ContainerRef {
        id: file.id.clone(),
        name: file.name.clone(),
    })
}

fn container(folder: DriveFile, fallback_name: &str) -> ContainerRef {
    ContainerRef {
        name: if folder.name.is_empty() {
            fallback_name.to_string()
        } else {
            folder.name
        },
        id: folder.id,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{Local, TimeZone};
    use drive_client::testing::{CannedResponse, FakeDrive, RecordedRequest};
    use drive_client::{Credentials, DriveClient, DriveFile, FOLDER_MIME_TYPE};
    use serde_json::{json, Value};

    use super::{select_root, DriveStore};
    use crate::store::{ContainerRef, RemoteStore};

    fn folder(id: &str, name: &str, created: Option<&str>) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: Vec::new(),
            created_time: created.map(str::to_string),
        }
    }

    #[test]
    fn no_candidates_means_create() {
        assert!(select_root("Bukkit2Drive", &[]).is_none());
    }

    #[test]
    fn ignores_near_matches_and_non_folders() {
        let mut file = folder("f1", "Bukkit2Drive", Some("2023-01-01T00:00:00.000Z"));
        file.mime_type = Some("application/zip".to_string());
        let candidates = vec![
            folder("a", "bukkit2drive", Some("2020-01-01T00:00:00.000Z")),
            folder("b", "Bukkit2Drive ", Some("2020-01-01T00:00:00.000Z")),
            file,
        ];
        assert!(select_root("Bukkit2Drive", &candidates).is_none());
    }

    #[test]
    fn earliest_created_match_wins() {
        let candidates = vec![
            folder("newer", "Bukkit2Drive", Some("2024-03-01T10:00:00.000Z")),
            folder("undated", "Bukkit2Drive", None),
            folder("oldest", "Bukkit2Drive", Some("2021-07-15T08:30:00.000Z")),
        ];
        let root = select_root("Bukkit2Drive", &candidates).unwrap();
        assert_eq!(root.id, "oldest");

        let reversed: Vec<_> = candidates.into_iter().rev().collect();
        assert_eq!(select_root("Bukkit2Drive", &reversed).unwrap().id, "oldest");
    }

    /// Folders the fake Drive knows about: (id, name, parents).
    type Folders = Arc<Mutex<Vec<(String, String, Vec<String>)>>>;

    fn folder_api(
        folders: Folders,
    ) -> impl Fn(&RecordedRequest) -> CannedResponse + Send + Sync + 'static {
        move |req: &RecordedRequest| match (req.method.as_str(), req.path()) {
            ("GET", "/drive/v3/files") => {
                let query = req.query("q").unwrap_or_default();
                let files: Vec<Value> = folders
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(_, name, _)| query.contains(&format!("name = '{name}'")))
                    .map(|(id, name, parents)| {
                        json!({"id": id, "name": name, "mimeType": FOLDER_MIME_TYPE, "parents": parents})
                    })
                    .collect();
                CannedResponse::json(200, json!({"files": files}))
            }
            ("POST", "/drive/v3/files") => {
                let metadata = req.json();
                let name = metadata["name"].as_str().unwrap_or_default().to_string();
                let parents: Vec<String> = metadata["parents"]
                    .as_array()
                    .map(|ids| ids.iter().filter_map(|id| id.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                let mut folders = folders.lock().unwrap();
                let id = format!("folder-{}", folders.len() + 1);
                folders.push((id.clone(), name.clone(), parents.clone()));
                CannedResponse::json(200, json!({"id": id, "name": name, "parents": parents}))
            }
            ("POST", "/upload/drive/v3/files") => {
                CannedResponse::json(200, json!({"id": "object-1", "name": "world.zip"}))
            }
            _ => CannedResponse::json(404, json!({"error": "not found"})),
        }
    }

    async fn drive_store() -> (FakeDrive, DriveStore) {
        let drive = FakeDrive::start(folder_api(Folders::default())).await.unwrap();
        let client = DriveClient::new(&drive.settings(), Credentials::Bearer("token".into())).unwrap();
        (drive, DriveStore::new(Arc::new(client)))
    }

    #[tokio::test]
    async fn root_is_created_once_then_found() {
        let (drive, store) = drive_store().await;

        let first = store.find_or_create_root("Bukkit2Drive").await.unwrap();
        let second = store.find_or_create_root("Bukkit2Drive").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "Bukkit2Drive");

        let requests = drive.requests();
        let calls: Vec<_> = requests.iter().map(|req| req.method.as_str()).collect();
        assert_eq!(calls, ["GET", "POST", "GET"]);
        assert_eq!(
            requests[1].json(),
            json!({"name": "Bukkit2Drive", "mimeType": FOLDER_MIME_TYPE})
        );
        assert_eq!(requests[0].query("orderBy").as_deref(), Some("createdTime"));
    }

    #[tokio::test]
    async fn run_folder_and_archive_go_under_their_parents() {
        let (drive, store) = drive_store().await;
        let root = ContainerRef {
            id: "root-1".to_string(),
            name: "Bukkit2Drive".to_string(),
        };
        let timestamp = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let run = store.create_dated_container(&root, timestamp).await.unwrap();
        assert_eq!(run.name, "2024-01-01 00:00:00");

        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch.zip");
        std::fs::write(&scratch, b"PK\x05\x06").unwrap();
        let object = store
            .upload_artifact(&run, "world.zip", &scratch, "application/zip")
            .await
            .unwrap();
        assert_eq!(object.id, "object-1");
        assert_eq!(object.name, "world.zip");

        let requests = drive.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].json()["parents"], json!(["root-1"]));
        assert_eq!(requests[1].query("uploadType").as_deref(), Some("multipart"));
        let body = String::from_utf8_lossy(&requests[1].body).into_owned();
        assert!(body.contains(&format!(r#""parents":["{}"]"#, run.id)));
    }

    #[tokio::test]
    async fn listing_failure_surfaces_as_retryable_store_error() {
        let drive = FakeDrive::start(|_: &RecordedRequest| {
            CannedResponse::json(500, json!({"error": "backend error"}))
        })
        .await
        .unwrap();
        let client = DriveClient::new(&drive.settings(), Credentials::Bearer("token".into())).unwrap();
        let store = DriveStore::new(Arc::new(client));

        let err = store.find_or_create_root("Bukkit2Drive").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(drive.requests().len(), 1);
    }
}
