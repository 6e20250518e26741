mod auth;
mod client;

pub use auth::{AuthClient, AuthError, AuthToken};
pub use client::{
    ApiErrorClass, FolderPermission, MoveitClient, MoveitError, RemoteFile, RemoteFolder,
    RemoteId, UploadOutcome,
};

use url::Url;

/// Parses a server address so that relative endpoints resolve beneath its path.
///
/// `https://host/api/v1` and `https://host/api/v1/` both become
/// `https://host/api/v1/`, so joining `files` yields `https://host/api/v1/files`.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
