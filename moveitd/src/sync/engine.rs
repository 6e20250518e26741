use std::path::{Path, PathBuf};

use moveit_core::{ApiErrorClass, AuthToken, MoveitClient, MoveitError, RemoteId, UploadOutcome};
use thiserror::Error;
use tracing::{info, warn};

use super::local_watcher::FileChangeEvent;
use super::resolver::resolve_file_id;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no writable destination folder")]
    NoDestination,
    #[error("not authenticated")]
    Unauthenticated,
    #[error("local file is missing: {0}")]
    LocalFileMissing(PathBuf),
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("'{0}' not found on the server")]
    RemoteNotFound(String),
    #[error("upload of '{name}' rejected with {status}: {body}")]
    UploadRejected {
        name: String,
        status: u16,
        body: String,
    },
    #[error("{operation} of '{name}' failed: {source}")]
    Transport {
        operation: &'static str,
        name: String,
        #[source]
        source: MoveitError,
    },
}

impl SyncError {
    pub fn api_class(&self) -> Option<ApiErrorClass> {
        match self {
            SyncError::Transport { source, .. } => source.classification(),
            _ => None,
        }
    }
}

/// Terminal result of replaying one local change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Uploaded { name: String },
    AlreadyExists { name: String },
    Deleted { name: String },
    Renamed { from: String, to: String },
}

/// Replays local changes against the server, one independent call chain per event.
///
/// Holds only values fixed at startup, so a single instance can be shared
/// across concurrently running handlers.
pub struct SyncEngine {
    client: MoveitClient,
    token: Option<AuthToken>,
    destination: Option<RemoteId>,
}

impl SyncEngine {
    pub fn new(
        client: MoveitClient,
        token: Option<AuthToken>,
        destination: Option<RemoteId>,
    ) -> Self {
        Self {
            client,
            token,
            destination,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn destination(&self) -> Option<&RemoteId> {
        self.destination.as_ref()
    }

    /// Handles one event and logs its outcome. Failures are returned, never retried.
    pub async fn handle_event(&self, event: FileChangeEvent) -> Result<SyncOutcome, SyncError> {
        let result = match &event {
            FileChangeEvent::Created(path) => self.upload(path).await,
            FileChangeEvent::Deleted(path) => self.delete(path).await,
            FileChangeEvent::Renamed { from, to } => self.rename(from, to).await,
        };
        report(&event, &result);
        result
    }

    async fn upload(&self, path: &Path) -> Result<SyncOutcome, SyncError> {
        let name = file_name(path)?;
        let folder = self.destination.as_ref().ok_or(SyncError::NoDestination)?;
        let token = self.token()?;
        match self.client.upload_file(token, folder, path).await {
            Ok(UploadOutcome::Uploaded) => Ok(SyncOutcome::Uploaded { name }),
            Ok(UploadOutcome::AlreadyExists) => Ok(SyncOutcome::AlreadyExists { name }),
            Ok(UploadOutcome::Failed { status, body }) => Err(SyncError::UploadRejected {
                name,
                status: status.as_u16(),
                body,
            }),
            Err(MoveitError::LocalFileMissing(path)) => Err(SyncError::LocalFileMissing(path)),
            Err(MoveitError::NotAFile(path)) => Err(SyncError::NotAFile(path)),
            Err(source) => Err(SyncError::Transport {
                operation: "upload",
                name,
                source,
            }),
        }
    }

    async fn delete(&self, path: &Path) -> Result<SyncOutcome, SyncError> {
        let name = file_name(path)?;
        let token = self.token()?;
        let file_id = self.resolve(token, &name).await?;
        self.client
            .delete_file(token, &file_id)
            .await
            .map_err(|source| SyncError::Transport {
                operation: "delete",
                name: name.clone(),
                source,
            })?;
        Ok(SyncOutcome::Deleted { name })
    }

    // Resolution uses the old name only; the new name is just the PATCH payload.
    async fn rename(&self, from: &Path, to: &Path) -> Result<SyncOutcome, SyncError> {
        let old_name = file_name(from)?;
        let new_name = file_name(to)?;
        let token = self.token()?;
        let file_id = self.resolve(token, &old_name).await?;
        self.client
            .rename_file(token, &file_id, &new_name)
            .await
            .map_err(|source| SyncError::Transport {
                operation: "rename",
                name: old_name.clone(),
                source,
            })?;
        Ok(SyncOutcome::Renamed {
            from: old_name,
            to: new_name,
        })
    }

    async fn resolve(&self, token: &AuthToken, name: &str) -> Result<RemoteId, SyncError> {
        resolve_file_id(&self.client, token, name)
            .await
            .map_err(|source| SyncError::Transport {
                operation: "lookup",
                name: name.to_string(),
                source,
            })?
            .ok_or_else(|| SyncError::RemoteNotFound(name.to_string()))
    }

    fn token(&self) -> Result<&AuthToken, SyncError> {
        self.token.as_ref().ok_or(SyncError::Unauthenticated)
    }
}

fn file_name(path: &Path) -> Result<String, SyncError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::NotAFile(path.to_path_buf()))
}

fn report(event: &FileChangeEvent, result: &Result<SyncOutcome, SyncError>) {
    match result {
        Ok(SyncOutcome::Uploaded { name }) => info!(file = %name, "uploaded"),
        Ok(SyncOutcome::AlreadyExists { name }) => {
            info!(file = %name, "already exists on the server")
        }
        Ok(SyncOutcome::Deleted { name }) => info!(file = %name, "deleted from the server"),
        Ok(SyncOutcome::Renamed { from, to }) => {
            info!(from = %from, to = %to, "renamed on the server")
        }
        Err(SyncError::RemoteNotFound(name)) => {
            warn!(file = %name, "not found on the server; nothing to do")
        }
        Err(err) => warn!(
            event = ?event,
            class = ?err.api_class(),
            error = %err,
            "failed to sync local change"
        ),
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
