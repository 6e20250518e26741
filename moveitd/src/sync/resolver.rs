use moveit_core::{AuthToken, MoveitClient, MoveitError, RemoteFile, RemoteId};
use tracing::{info, warn};

/// Maps a local file name to the id of the remote file with exactly that name.
///
/// Every call lists the server's files afresh so the answer reflects current
/// remote state. When several files share the name, the first one in listing
/// order wins. Entries listed without a usable id are skipped.
pub async fn resolve_file_id(
    client: &MoveitClient,
    token: &AuthToken,
    name: &str,
) -> Result<Option<RemoteId>, MoveitError> {
    let files = client.list_files(token).await?;
    Ok(find_by_name(files, name))
}

fn find_by_name(files: Vec<RemoteFile>, name: &str) -> Option<RemoteId> {
    files
        .into_iter()
        .filter(|file| file.name == name)
        .find_map(|file| file.id)
}

/// Picks the upload destination once at startup; failures leave it unset.
pub async fn resolve_destination(client: &MoveitClient, token: &AuthToken) -> Option<RemoteId> {
    match client.first_writable_folder(token).await {
        Ok(folder) => {
            info!(folder = %folder, "resolved writable destination folder");
            Some(folder)
        }
        Err(MoveitError::NoWritableFolder) => {
            warn!("no folder with write permission; uploads will fail");
            None
        }
        Err(err) => {
            warn!(error = %err, "failed to list folders; uploads will fail");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, name: &str) -> RemoteFile {
        RemoteFile {
            id: Some(RemoteId::new(id)),
            name: name.to_string(),
            size: None,
        }
    }

    #[test]
    fn exact_match_is_case_sensitive() {
        let files = vec![file("1", "Report.txt"), file("2", "report.txt")];
        assert_eq!(find_by_name(files, "report.txt"), Some(RemoteId::new("2")));
    }

    #[test]
    fn first_duplicate_wins() {
        let files = vec![
            file("1", "notes.md"),
            file("2", "report.txt"),
            file("3", "report.txt"),
        ];
        assert_eq!(find_by_name(files, "report.txt"), Some(RemoteId::new("2")));
    }

    #[test]
    fn absent_name_resolves_to_none() {
        let files = vec![file("1", "notes.md")];
        assert_eq!(find_by_name(files, "report.txt"), None);
        assert_eq!(find_by_name(Vec::new(), "report.txt"), None);
    }

    #[test]
    fn entries_without_id_are_skipped() {
        let orphan = RemoteFile {
            id: None,
            name: "report.txt".to_string(),
            size: None,
        };
        let files = vec![orphan, file("f-2", "report.txt")];
        assert_eq!(find_by_name(files, "report.txt"), Some(RemoteId::new("f-2")));
    }
}
