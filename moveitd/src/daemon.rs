use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use moveit_core::{AuthClient, AuthToken, MoveitClient};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::settings::Settings;
use crate::sync::engine::SyncEngine;
use crate::sync::local_watcher::{FileChangeEvent, start_notify_watcher};
use crate::sync::resolver::resolve_destination;

pub struct DaemonRuntime {
    local_dir: PathBuf,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    /// Prepares the watched directory, then authenticates and picks a destination.
    ///
    /// Authentication and folder lookup failures are logged and leave the engine
    /// degraded; only local setup errors abort startup.
    pub async fn bootstrap(settings: Settings) -> anyhow::Result<Self> {
        let local_dir = prepare_local_dir(&settings.local_dir).await?;
        let client =
            MoveitClient::new(&settings.server_url).context("invalid MOVEit server url")?;
        let auth = AuthClient::new(&settings.server_url).context("invalid MOVEit server url")?;
        info!(server = %client.base_url(), user = %settings.username, "connecting");

        let token = authenticate(&auth, &settings).await;
        let destination = match &token {
            Some(token) => resolve_destination(&client, token).await,
            None => {
                warn!("skipping folder lookup without a token; uploads will fail");
                None
            }
        };
        let engine = Arc::new(SyncEngine::new(client, token, destination));

        Ok(Self { local_dir, engine })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Watches until Ctrl-C. In-flight handlers are abandoned on exit.
    pub async fn run(self) -> anyhow::Result<()> {
        let (watcher, rx) = start_notify_watcher(&self.local_dir).with_context(|| {
            format!("failed to watch {}", self.local_dir.display())
        })?;
        info!(
            dir = %self.local_dir.display(),
            authenticated = self.engine.is_authenticated(),
            destination = ?self.engine.destination().map(|id| id.as_str()),
            "monitoring local folder; press Ctrl-C to exit"
        );

        let dispatcher = tokio::spawn(dispatch_events(Arc::clone(&self.engine), rx));

        let _watcher = watcher;
        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        info!("shutdown requested");
        dispatcher.abort();
        Ok(())
    }
}

/// Spawns one independent task per event; returns once the channel closes.
pub async fn dispatch_events(
    engine: Arc<SyncEngine>,
    mut rx: mpsc::UnboundedReceiver<FileChangeEvent>,
) {
    while let Some(event) = rx.recv().await {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            // Outcome is logged by the engine.
            let _ = engine.handle_event(event).await;
        });
    }
}

async fn authenticate(auth: &AuthClient, settings: &Settings) -> Option<AuthToken> {
    match auth
        .authenticate(&settings.username, &settings.password)
        .await
    {
        Ok(token) => {
            info!(user = %settings.username, "authenticated");
            Some(token)
        }
        Err(err) => {
            error!(error = %err, "authentication failed; remote calls will fail");
            None
        }
    }
}

async fn prepare_local_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create local folder at {}", dir.display()))?;
        info!(dir = %dir.display(), "created local folder");
    }
    let canonical = tokio::fs::canonicalize(dir)
        .await
        .with_context(|| format!("failed to resolve local folder {}", dir.display()))?;
    anyhow::ensure!(
        tokio::fs::metadata(&canonical).await?.is_dir(),
        "local folder is not a directory: {}",
        canonical.display()
    );
    Ok(canonical)
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
