use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::auth::AuthToken;
use crate::parse_base_url;

#[derive(Debug, Error)]
pub enum MoveitError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("no folder with write permission")]
    NoWritableFolder,
    #[error("local file is missing: {0}")]
    LocalFileMissing(PathBuf),
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    Conflict,
    Transient,
    Permanent,
}

/// Result of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The server answered 409: a file with this name is already in the folder.
    AlreadyExists,
    Failed { status: StatusCode, body: String },
}

/// Stateless wrapper over the file-management endpoints.
///
/// The bearer token is passed to every call and attached to that request only;
/// the shared `reqwest::Client` carries no default headers.
#[derive(Clone)]
pub struct MoveitClient {
    http: Client,
    base_url: Url,
}

impl MoveitClient {
    pub fn new(base_url: &str) -> Result<Self, MoveitError> {
        Ok(Self {
            http: Client::new(),
            base_url: parse_base_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn list_folders(
        &self,
        token: &AuthToken,
    ) -> Result<Vec<RemoteFolder>, MoveitError> {
        let url = self.endpoint("folders")?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.bearer_header())
            .send()
            .await?;
        let page: ItemPage<RemoteFolder> = Self::handle_response(response).await?;
        Ok(page.items)
    }

    /// Returns the id of the first folder, in server order, that accepts uploads.
    /// Entries without a usable id are skipped.
    pub async fn first_writable_folder(
        &self,
        token: &AuthToken,
    ) -> Result<RemoteId, MoveitError> {
        self.list_folders(token)
            .await?
            .into_iter()
            .filter(RemoteFolder::can_write)
            .find_map(|folder| folder.id)
            .ok_or(MoveitError::NoWritableFolder)
    }

    pub async fn list_files(&self, token: &AuthToken) -> Result<Vec<RemoteFile>, MoveitError> {
        let url = self.endpoint("files")?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.bearer_header())
            .send()
            .await?;
        let page: ItemPage<RemoteFile> = Self::handle_response(response).await?;
        Ok(page.items)
    }

    /// Streams `local_path` into `folder_id` as a multipart `file` part.
    ///
    /// No request is issued when the path is gone or is not a regular file.
    pub async fn upload_file(
        &self,
        token: &AuthToken,
        folder_id: &RemoteId,
        local_path: &Path,
    ) -> Result<UploadOutcome, MoveitError> {
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| MoveitError::NotAFile(local_path.to_path_buf()))?;
        let file = match tokio::fs::File::open(local_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(MoveitError::LocalFileMissing(local_path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(MoveitError::NotAFile(local_path.to_path_buf()));
        }

        let body = Body::wrap_stream(ReaderStream::new(file));
        // Unsized part: the file may still be growing while it streams.
        let part = Part::stream(body).file_name(file_name);
        let form = Form::new().part("file", part);

        let url = self.endpoint(&format!("folders/{folder_id}/files"))?;
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, token.bearer_header())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(UploadOutcome::Uploaded)
        } else if status == StatusCode::CONFLICT {
            Ok(UploadOutcome::AlreadyExists)
        } else {
            let body = response.text().await.unwrap_or_default();
            Ok(UploadOutcome::Failed { status, body })
        }
    }

    pub async fn delete_file(
        &self,
        token: &AuthToken,
        file_id: &RemoteId,
    ) -> Result<(), MoveitError> {
        let url = self.endpoint(&format!("files/{file_id}"))?;
        let response = self
            .http
            .delete(url)
            .header(AUTHORIZATION, token.bearer_header())
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    pub async fn rename_file(
        &self,
        token: &AuthToken,
        file_id: &RemoteId,
        new_name: &str,
    ) -> Result<(), MoveitError> {
        let url = self.endpoint(&format!("files/{file_id}"))?;
        let response = self
            .http
            .patch(url)
            .header(AUTHORIZATION, token.bearer_header())
            .json(&RenameRequest { name: new_name })
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, MoveitError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, MoveitError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(MoveitError::Api { status, body })
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<(), MoveitError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(MoveitError::Api { status, body })
        }
    }
}

impl MoveitError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            MoveitError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::CONFLICT {
        ApiErrorClass::Conflict
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Server-side identifier of a file or folder.
///
/// The API emits ids as JSON numbers on some versions and strings on others.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawId")]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl From<RawId> for RemoteId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(value) => RemoteId(value),
            RawId::Unsigned(value) => RemoteId(value.to_string()),
            RawId::Signed(value) => RemoteId(value.to_string()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListedId {
    Id(RawId),
    Unusable(IgnoredAny),
}

// A missing, null or malformed id drops that entry's id, not the whole listing.
fn listed_id<'de, D>(deserializer: D) -> Result<Option<RemoteId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match ListedId::deserialize(deserializer)? {
        ListedId::Id(raw) => Some(raw.into()),
        ListedId::Unusable(_) => None,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RemoteFolder {
    #[serde(default, deserialize_with = "listed_id")]
    pub id: Option<RemoteId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub permission: FolderPermission,
}

impl RemoteFolder {
    pub fn can_write(&self) -> bool {
        self.permission.can_write_files
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderPermission {
    #[serde(default)]
    pub can_write_files: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RemoteFile {
    #[serde(default, deserialize_with = "listed_id")]
    pub id: Option<RemoteId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

// Listings are single-page; paging fields are ignored.
#[derive(Debug, Deserialize)]
struct ItemPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Serialize)]
struct RenameRequest<'a> {
    name: &'a str,
}
