use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";
const DEFAULT_LOCAL_DIR_NAME: &str = "Local";

/// Validated settings handed to the daemon. Immutable after load.
#[derive(Clone)]
pub struct Settings {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub local_dir: PathBuf,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("local_dir", &self.local_dir)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SettingsFile {
    #[serde(default)]
    moveit_server_url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    local_folder_path: Option<String>,
}

impl Settings {
    /// Reads the JSON settings file and applies `MOVEIT_*` environment overrides.
    ///
    /// An explicitly requested file must exist; the default `appsettings.json`
    /// is optional so that the environment alone can configure the daemon.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let file = match explicit {
            Some(path) => read_settings_file(path)?,
            None => {
                let default = Path::new(DEFAULT_SETTINGS_FILE);
                if default.exists() {
                    read_settings_file(default)?
                } else {
                    SettingsFile::default()
                }
            }
        };
        let home = dirs::home_dir();
        let desktop = dirs::desktop_dir();
        Self::from_sources(
            file,
            |name| std::env::var(name).ok(),
            home.as_deref(),
            desktop.as_deref(),
        )
    }

    fn from_sources<F>(
        file: SettingsFile,
        lookup: F,
        home: Option<&Path>,
        desktop: Option<&Path>,
    ) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let server_url = env("MOVEIT_SERVER_URL")
            .or(file.moveit_server_url)
            .unwrap_or_default();
        let username = env("MOVEIT_USERNAME").or(file.username).unwrap_or_default();
        let password = env("MOVEIT_PASSWORD").or(file.password).unwrap_or_default();
        let local_dir = match env("MOVEIT_LOCAL_DIR")
            .or(file.local_folder_path)
            .filter(|value| !value.trim().is_empty())
        {
            Some(value) => expand_with_home(value.trim(), home)?,
            None => default_local_dir(home, desktop)?,
        };

        let settings = Self {
            server_url: server_url.trim().to_string(),
            username,
            password,
            local_dir,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.server_url.is_empty(), "MoveitServerUrl is not set");
        let url = Url::parse(&self.server_url)
            .with_context(|| format!("MoveitServerUrl is not a valid url: {}", self.server_url))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "MoveitServerUrl must use http or https: {}",
            self.server_url
        );
        anyhow::ensure!(!self.username.trim().is_empty(), "Username is not set");
        anyhow::ensure!(!self.password.is_empty(), "Password is not set");
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> anyhow::Result<SettingsFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings in {}", path.display()))
}

fn default_local_dir(home: Option<&Path>, desktop: Option<&Path>) -> anyhow::Result<PathBuf> {
    desktop
        .or(home)
        .map(|base| base.join(DEFAULT_LOCAL_DIR_NAME))
        .context("no desktop or home directory for the default local folder; set LocalFolderPath")
}

// The home directory is only required when the value starts with `~`.
fn expand_with_home(value: &str, home: Option<&Path>) -> anyhow::Result<PathBuf> {
    let rest = match value.strip_prefix('~') {
        Some("") => "",
        Some(rest) => match rest.strip_prefix('/') {
            Some(rest) => rest,
            None => return Ok(PathBuf::from(value)),
        },
        None => return Ok(PathBuf::from(value)),
    };
    let home =
        home.with_context(|| format!("cannot expand {value}: home directory is unavailable"))?;
    Ok(if rest.is_empty() {
        home.to_path_buf()
    } else {
        home.join(rest)
    })
}
