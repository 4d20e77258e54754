use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};
use url::Url;

use crate::errors::DriveError;
use crate::oauth::{refresh_access_token, AuthorizedUser, DEFAULT_TOKEN_URL};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3/";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3/";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Resumable upload chunks must be a multiple of this size (except the last one).
pub const UPLOAD_CHUNK_ALIGNMENT: usize = 256 * 1024;

const FILE_FIELDS: &str = "id,name,mimeType,parents,createdTime";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,parents,createdTime)";
const LIST_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone)]
pub struct DriveSettings {
    pub api_base: String,
    pub upload_base: String,
    pub token_url: String,
    pub request_timeout: Duration,
    /// Files larger than this use a resumable session instead of one multipart request.
    pub resumable_threshold: u64,
    pub chunk_size: usize,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            request_timeout: Duration::from_secs(600),
            resumable_threshold: 5 * 1024 * 1024,
            chunk_size: 8 * 1024 * 1024,
        }
    }
}

pub enum Credentials {
    /// Bearer token handed over by the host; never refreshed.
    Bearer(String),
    AuthorizedUser(AuthorizedUser),
}

pub struct DriveClient {
    client: Client,
    api_base: Url,
    upload_base: Url,
    token_url: String,
    resumable_threshold: u64,
    chunk_size: usize,
    auth: Mutex<AuthState>,
}

#[derive(Clone, Debug)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Clone, Debug)]
enum AuthState {
    Static(String),
    Refreshing {
        user: AuthorizedUser,
        access: Option<AccessToken>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub created_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<&'a str>,
}

impl DriveClient {
    pub fn new(settings: &DriveSettings, credentials: Credentials) -> Result<Self, DriveError> {
        let auth = match credentials {
            Credentials::Bearer(token) => AuthState::Static(token),
            Credentials::AuthorizedUser(user) => AuthState::Refreshing { user, access: None },
        };

        Ok(Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .redirect(reqwest::redirect::Policy::none())
                .timeout(settings.request_timeout)
                .build()?,
            api_base: Url::parse(&with_trailing_slash(&settings.api_base))?,
            upload_base: Url::parse(&with_trailing_slash(&settings.upload_base))?,
            token_url: settings.token_url.clone(),
            resumable_threshold: settings.resumable_threshold,
            chunk_size: aligned_chunk_size(settings.chunk_size),
            auth: Mutex::new(auth),
        })
    }

    /// Obtains a usable access token up front so credential problems surface at startup.
    pub async fn authorize(&self) -> Result<(), DriveError> {
        let token = self.access_token().await?;
        if token.trim().is_empty() {
            return Err(DriveError::Auth("empty access token".to_string()));
        }
        Ok(())
    }

    async fn access_token(&self) -> Result<String, DriveError> {
        let auth = { self.auth.lock().expect("auth lock poisoned").clone() };
        match auth {
            AuthState::Static(token) => Ok(token),
            AuthState::Refreshing { user, access } => {
                if let Some(access) = access {
                    if Instant::now() + Duration::from_secs(60) < access.expires_at {
                        return Ok(access.value);
                    }
                }

                debug!("refreshing drive access token");
                let token = refresh_access_token(&self.client, &self.token_url, &user).await?;
                let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600).max(30));
                let access = AccessToken {
                    value: token.access_token.clone(),
                    expires_at: Instant::now() + lifetime,
                };

                let mut auth = self.auth.lock().expect("auth lock poisoned");
                *auth = AuthState::Refreshing {
                    user,
                    access: Some(access),
                };
                Ok(token.access_token)
            }
        }
    }

    fn invalidate_access_token(&self) {
        let mut auth = self.auth.lock().expect("auth lock poisoned");
        if let AuthState::Refreshing { access, .. } = &mut *auth {
            *access = None;
        }
    }

    /// Lists every file matching a Drive search query, following pagination.
    pub async fn list_files(
        &self,
        query: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.api_base.join("files")?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs
                    .append_pair("q", query)
                    .append_pair("spaces", "drive")
                    .append_pair("pageSize", LIST_PAGE_SIZE)
                    .append_pair("fields", LIST_FIELDS);
                if let Some(order) = order_by {
                    pairs.append_pair("orderBy", order);
                }
                if let Some(token) = page_token.as_deref() {
                    pairs.append_pair("pageToken", token);
                }
            }

            let response = self
                .client
                .get(url)
                .bearer_auth(self.access_token().await?)
                .send()
                .await?;
            let page: FileList = self.read_json(response).await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(files)
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.api_base.join("files")?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);

        let metadata = FileMetadata {
            name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: parent.into_iter().collect(),
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(self.access_token().await?)
            .json(&metadata)
            .send()
            .await?;
        let folder: DriveFile = self.read_json(response).await?;
        info!(id = %folder.id, name = %folder.name, "created drive folder");
        Ok(folder)
    }

    /// Uploads a local file as a new Drive object under `parent`.
    pub async fn upload_file(
        &self,
        name: &str,
        parent: &str,
        path: &Path,
        mime_type: &str,
    ) -> Result<DriveFile, DriveError> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|err| DriveError::io(path, err))?
            .len();

        let metadata = FileMetadata {
            name,
            mime_type: Some(mime_type),
            parents: vec![parent],
        };

        if size > self.resumable_threshold {
            debug!(name, size, "using resumable upload");
            self.upload_resumable(&metadata, path, size, mime_type).await
        } else {
            debug!(name, size, "using multipart upload");
            self.upload_multipart(&metadata, path, mime_type).await
        }
    }

    async fn upload_multipart(
        &self,
        metadata: &FileMetadata<'_>,
        path: &Path,
        mime_type: &str,
    ) -> Result<DriveFile, DriveError> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|err| DriveError::io(path, err))?;
        let metadata_json = serde_json::to_vec(metadata).map_err(|source| DriveError::Parse {
            source,
            body: String::new(),
        })?;

        let boundary = multipart_boundary();
        let body = multipart_related_body(&boundary, &metadata_json, mime_type, &content);

        let mut url = self.upload_base.join("files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("fields", FILE_FIELDS);

        let response = self
            .client
            .post(url)
            .bearer_auth(self.access_token().await?)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        self.read_json(response).await
    }

    async fn upload_resumable(
        &self,
        metadata: &FileMetadata<'_>,
        path: &Path,
        total: u64,
        mime_type: &str,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.upload_base.join("files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", FILE_FIELDS);

        let response = self
            .client
            .post(url)
            .bearer_auth(self.access_token().await?)
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", total.to_string())
            .json(metadata)
            .send()
            .await?;
        let response = self.check_status(response).await?;
        let session = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .ok_or_else(|| DriveError::Upload("session response missing Location".to_string()))?;

        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|err| DriveError::io(path, err))?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut offset = 0u64;

        loop {
            let read = read_full(&mut file, &mut buffer)
                .await
                .map_err(|err| DriveError::io(path, err))?;
            if read == 0 {
                return Err(DriveError::Upload(format!(
                    "file ended at {offset} of {total} bytes"
                )));
            }
            let end = offset + read as u64 - 1;

            let response = self
                .client
                .put(&session)
                .header(header::CONTENT_RANGE, format!("bytes {offset}-{end}/{total}"))
                .body(buffer[..read].to_vec())
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return self.read_json(response).await;
            }
            if status != StatusCode::PERMANENT_REDIRECT {
                return Err(self.status_error(response).await);
            }

            // 308: the server reports how much it has persisted so far.
            let acknowledged = response
                .headers()
                .get(header::RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_range_end)
                .map(|last| last + 1)
                .unwrap_or(0);
            if acknowledged <= offset {
                return Err(DriveError::Upload(format!(
                    "no progress past byte {offset} of {total}"
                )));
            }
            if acknowledged != end + 1 {
                file.seek(SeekFrom::Start(acknowledged))
                    .await
                    .map_err(|err| DriveError::io(path, err))?;
            }
            debug!(acknowledged, total, "upload chunk accepted");
            offset = acknowledged;
        }
    }

    async fn check_status(&self, response: Response) -> Result<Response, DriveError> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.status_error(response).await)
    }

    async fn status_error(&self, response: Response) -> DriveError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_access_token();
        }
        let body = response.text().await.unwrap_or_default();
        DriveError::Status { status, body }
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response) -> Result<T, DriveError> {
        let response = self.check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str::<T>(&body).map_err(|source| DriveError::Parse { source, body })
    }
}

/// Quotes a value for use as a string literal inside a Drive `q` expression.
pub fn escape_query_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\\' || ch == '\'' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

pub fn folder_by_name_query(name: &str, parent: Option<&str>) -> String {
    let mut query = format!(
        "name = {} and mimeType = '{}' and trashed = false",
        escape_query_literal(name),
        FOLDER_MIME_TYPE
    );
    if let Some(parent) = parent {
        query.push_str(&format!(" and {} in parents", escape_query_literal(parent)));
    }
    query
}

fn multipart_related_body(
    boundary: &str,
    metadata_json: &[u8],
    mime_type: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata_json.len() + content.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata_json);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn multipart_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("drive-backup-{nanos:x}")
}

/// Parses the last acknowledged byte out of a `Range: bytes=0-N` header.
fn parse_range_end(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes=")?;
    let (_, end) = range.split_once('-')?;
    end.trim().parse::<u64>().ok()
}

fn aligned_chunk_size(requested: usize) -> usize {
    let chunks = (requested / UPLOAD_CHUNK_ALIGNMENT).max(1);
    chunks * UPLOAD_CHUNK_ALIGNMENT
}

fn with_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

async fn read_full(file: &mut tokio::fs::File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
