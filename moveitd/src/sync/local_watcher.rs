use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long the source half of a rename waits for its destination half before
/// it is treated as a move out of the folder.
const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(500);

/// A change observed in the watched directory. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChangeEvent {
    Created(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Arms a non-recursive watcher on `root`.
///
/// Must be called from within a Tokio runtime: rename halves are paired on a
/// spawned task. The watcher must be kept alive for as long as events are
/// wanted; dropping it closes the channel.
pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<FileChangeEvent>)> {
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let _ = raw_tx.send(event);
        }
        Err(err) => warn!(error = %err, "filesystem watcher error"),
    })?;
    watcher.watch(root, RecursiveMode::NonRecursive)?;
    tokio::spawn(pair_renames(raw_rx, tx, RenameTracker::new(root)));
    Ok((watcher, rx))
}

async fn pair_renames(
    mut raw_rx: mpsc::UnboundedReceiver<Event>,
    tx: mpsc::UnboundedSender<FileChangeEvent>,
    mut tracker: RenameTracker,
) {
    loop {
        let received = match tracker.next_deadline() {
            Some(deadline) => tokio::select! {
                received = raw_rx.recv() => received,
                _ = tokio::time::sleep_until(deadline) => {
                    for change in tracker.expire(Instant::now()) {
                        if tx.send(change).is_err() {
                            return;
                        }
                    }
                    continue;
                }
            },
            None => raw_rx.recv().await,
        };
        let Some(event) = received else {
            return;
        };
        let now = Instant::now();
        let mut changes = tracker.expire(now);
        changes.extend(tracker.map_event(event, now));
        for change in changes {
            if tx.send(change).is_err() {
                return;
            }
        }
    }
}

#[derive(Debug)]
struct PendingMove {
    tracker: Option<usize>,
    path: PathBuf,
    seen: Instant,
}

/// Turns raw notifications into [`FileChangeEvent`]s, pairing rename halves.
///
/// Backends differ: inotify sends `From`, `To` and then `Both` sharing one
/// cookie, Windows sends untracked `From`/`To`, FSEvents sends `Any` for each
/// side. A source half that stays unpaired means the file left the folder; a
/// destination half with no source means it arrived from elsewhere.
#[derive(Debug)]
struct RenameTracker {
    root: PathBuf,
    pending: Vec<PendingMove>,
    // Cookies already reported as `Renamed` from their `To` half.
    completed: HashSet<usize>,
}

impl RenameTracker {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            pending: Vec::new(),
            completed: HashSet::new(),
        }
    }

    fn map_event(&mut self, event: Event, now: Instant) -> Vec<FileChangeEvent> {
        let tracker = event.tracker();
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                self.both(tracker, &event.paths[0], &event.paths[1])
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                let Some(path) = event.paths.into_iter().next() else {
                    return Vec::new();
                };
                if !self.is_entry(&path) {
                    return Vec::new();
                }
                match mode {
                    RenameMode::From => self.source(tracker, path, now),
                    RenameMode::To => self.destination(tracker, path),
                    RenameMode::Any | RenameMode::Other if path.exists() => {
                        self.destination(tracker, path)
                    }
                    RenameMode::Any | RenameMode::Other => self.source(tracker, path, now),
                    RenameMode::Both => Vec::new(),
                }
            }
            EventKind::Create(_) => event
                .paths
                .into_iter()
                .filter(|path| self.is_entry(path))
                .map(FileChangeEvent::Created)
                .collect(),
            EventKind::Remove(_) => event
                .paths
                .into_iter()
                .filter(|path| self.is_entry(path))
                .map(FileChangeEvent::Deleted)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Reports unpaired source halves older than the pairing window as deletions.
    fn expire(&mut self, now: Instant) -> Vec<FileChangeEvent> {
        let mut expired = Vec::new();
        self.pending.retain(|pending| {
            if now.saturating_duration_since(pending.seen) >= RENAME_PAIR_WINDOW {
                expired.push(FileChangeEvent::Deleted(pending.path.clone()));
                false
            } else {
                true
            }
        });
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .map(|pending| pending.seen + RENAME_PAIR_WINDOW)
            .min()
    }

    fn both(&mut self, tracker: Option<usize>, from: &Path, to: &Path) -> Vec<FileChangeEvent> {
        if let Some(cookie) = tracker {
            if self.completed.remove(&cookie) {
                return Vec::new();
            }
            self.pending.retain(|pending| pending.tracker != Some(cookie));
        }
        match (self.is_entry(from), self.is_entry(to)) {
            (true, true) => vec![FileChangeEvent::Renamed {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
            }],
            (true, false) => vec![FileChangeEvent::Deleted(from.to_path_buf())],
            (false, true) => vec![FileChangeEvent::Created(to.to_path_buf())],
            (false, false) => Vec::new(),
        }
    }

    fn source(
        &mut self,
        tracker: Option<usize>,
        path: PathBuf,
        now: Instant,
    ) -> Vec<FileChangeEvent> {
        debug!(path = %path.display(), ?tracker, "rename source awaiting destination");
        self.pending.push(PendingMove {
            tracker,
            path,
            seen: now,
        });
        Vec::new()
    }

    fn destination(&mut self, tracker: Option<usize>, path: PathBuf) -> Vec<FileChangeEvent> {
        let matched = self
            .pending
            .iter()
            .position(|pending| pending.tracker == tracker);
        match matched {
            Some(index) => {
                let source = self.pending.remove(index);
                if let Some(cookie) = tracker {
                    self.completed.insert(cookie);
                }
                vec![FileChangeEvent::Renamed {
                    from: source.path,
                    to: path,
                }]
            }
            None => vec![FileChangeEvent::Created(path)],
        }
    }

    // Only direct children count; the root itself and anything outside it are ignored.
    fn is_entry(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path()) && path.file_name().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    fn rename(mode: RenameMode, paths: &[&str], cookie: Option<usize>) -> Event {
        let event = event(EventKind::Modify(ModifyKind::Name(mode)), paths);
        match cookie {
            Some(cookie) => event.set_tracker(cookie),
            None => event,
        }
    }

    #[test]
    fn maps_create_event_to_created() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let mapped = tracker.map_event(
            event(EventKind::Create(CreateKind::File), &["/sync/report.txt"]),
            Instant::now(),
        );
        assert_eq!(
            mapped,
            vec![FileChangeEvent::Created(PathBuf::from("/sync/report.txt"))]
        );
    }

    #[test]
    fn maps_remove_event_to_deleted() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let mapped = tracker.map_event(
            event(EventKind::Remove(RemoveKind::File), &["/sync/report.txt"]),
            Instant::now(),
        );
        assert_eq!(
            mapped,
            vec![FileChangeEvent::Deleted(PathBuf::from("/sync/report.txt"))]
        );
    }

    #[test]
    fn paired_inotify_rename_is_reported_once() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let now = Instant::now();

        let from = tracker.map_event(
            rename(RenameMode::From, &["/sync/report.txt"], Some(7)),
            now,
        );
        let to = tracker.map_event(rename(RenameMode::To, &["/sync/final.txt"], Some(7)), now);
        let both = tracker.map_event(
            rename(
                RenameMode::Both,
                &["/sync/report.txt", "/sync/final.txt"],
                Some(7),
            ),
            now,
        );

        assert!(from.is_empty());
        assert_eq!(
            to,
            vec![FileChangeEvent::Renamed {
                from: PathBuf::from("/sync/report.txt"),
                to: PathBuf::from("/sync/final.txt"),
            }]
        );
        assert!(both.is_empty());
        assert!(tracker.next_deadline().is_none());
        assert!(tracker.completed.is_empty());
    }

    #[test]
    fn standalone_both_event_maps_to_renamed() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let mapped = tracker.map_event(
            rename(RenameMode::Both, &["/sync/report.txt", "/sync/final.txt"], None),
            Instant::now(),
        );
        assert_eq!(
            mapped,
            vec![FileChangeEvent::Renamed {
                from: PathBuf::from("/sync/report.txt"),
                to: PathBuf::from("/sync/final.txt"),
            }]
        );
    }

    #[test]
    fn unpaired_destination_is_a_move_into_the_folder() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let mapped = tracker.map_event(
            rename(RenameMode::To, &["/sync/report.txt"], Some(3)),
            Instant::now(),
        );
        assert_eq!(
            mapped,
            vec![FileChangeEvent::Created(PathBuf::from("/sync/report.txt"))]
        );
    }

    #[test]
    fn unpaired_source_expires_as_deletion() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let start = Instant::now();

        let mapped = tracker.map_event(
            rename(RenameMode::From, &["/sync/report.txt"], Some(4)),
            start,
        );
        assert!(mapped.is_empty());
        assert_eq!(tracker.next_deadline(), Some(start + RENAME_PAIR_WINDOW));
        assert!(tracker.expire(start + Duration::from_millis(100)).is_empty());

        let expired = tracker.expire(start + RENAME_PAIR_WINDOW);
        assert_eq!(
            expired,
            vec![FileChangeEvent::Deleted(PathBuf::from("/sync/report.txt"))]
        );
        assert!(tracker.next_deadline().is_none());
    }

    #[test]
    fn untracked_halves_pair_in_order() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let now = Instant::now();

        tracker.map_event(rename(RenameMode::From, &["/sync/a.txt"], None), now);
        let mapped = tracker.map_event(rename(RenameMode::To, &["/sync/b.txt"], None), now);

        assert_eq!(
            mapped,
            vec![FileChangeEvent::Renamed {
                from: PathBuf::from("/sync/a.txt"),
                to: PathBuf::from("/sync/b.txt"),
            }]
        );
    }

    #[test]
    fn single_path_any_rename_uses_path_existence() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let old = root.join("report.txt");
        let new = root.join("final.txt");
        std::fs::write(&new, b"0123456789").unwrap();
        let mut tracker = RenameTracker::new(root);
        let now = Instant::now();

        let source = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            paths: vec![old.clone()],
            attrs: Default::default(),
        };
        let destination = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            paths: vec![new.clone()],
            attrs: Default::default(),
        };

        assert!(tracker.map_event(source, now).is_empty());
        assert_eq!(
            tracker.map_event(destination.clone(), now),
            vec![FileChangeEvent::Renamed {
                from: old,
                to: new.clone(),
            }]
        );
        assert_eq!(
            tracker.map_event(destination, now),
            vec![FileChangeEvent::Created(new)]
        );
    }

    #[test]
    fn ignores_content_changes() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let data = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            &["/sync/report.txt"],
        );
        assert!(tracker.map_event(data, Instant::now()).is_empty());
    }

    #[test]
    fn drops_paths_outside_root() {
        let mut tracker = RenameTracker::new(Path::new("/sync"));
        let now = Instant::now();
        let nested = event(
            EventKind::Create(CreateKind::File),
            &["/sync/sub/a.txt", "/elsewhere/b.txt", "/sync"],
        );
        let moved_root = rename(RenameMode::From, &["/sync"], None);

        assert!(tracker.map_event(nested, now).is_empty());
        assert!(tracker.map_event(moved_root, now).is_empty());
        assert!(tracker.next_deadline().is_none());
    }

    async fn next_change(
        rx: &mut mpsc::UnboundedReceiver<FileChangeEvent>,
        wanted: &FileChangeEvent,
    ) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(change) = rx.recv().await {
                if &change == wanted {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    fn watched_dirs() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let root = base.join("watched");
        let outside = base.join("outside");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(&outside).unwrap();
        (dir, root, outside)
    }

    #[tokio::test]
    async fn watcher_reports_created_file() {
        let (_dir, root, _) = watched_dirs();
        let (_watcher, mut rx) = start_notify_watcher(&root).unwrap();

        let target = root.join("report.txt");
        std::fs::write(&target, b"0123456789").unwrap();

        assert!(next_change(&mut rx, &FileChangeEvent::Created(target)).await);
    }

    #[tokio::test]
    async fn watcher_reports_move_into_folder_as_created() {
        let (_dir, root, outside) = watched_dirs();
        let source = outside.join("report.txt");
        std::fs::write(&source, b"0123456789").unwrap();
        let (_watcher, mut rx) = start_notify_watcher(&root).unwrap();

        let target = root.join("report.txt");
        std::fs::rename(&source, &target).unwrap();

        assert!(next_change(&mut rx, &FileChangeEvent::Created(target)).await);
    }

    #[tokio::test]
    async fn watcher_reports_move_out_of_folder_as_deleted() {
        let (_dir, root, outside) = watched_dirs();
        let source = root.join("report.txt");
        std::fs::write(&source, b"0123456789").unwrap();
        let (_watcher, mut rx) = start_notify_watcher(&root).unwrap();

        std::fs::rename(&source, outside.join("report.txt")).unwrap();

        assert!(next_change(&mut rx, &FileChangeEvent::Deleted(source)).await);
    }

    #[tokio::test]
    async fn watcher_reports_rename_inside_folder() {
        let (_dir, root, _) = watched_dirs();
        let from = root.join("report.txt");
        let to = root.join("final.txt");
        std::fs::write(&from, b"0123456789").unwrap();
        let (_watcher, mut rx) = start_notify_watcher(&root).unwrap();

        std::fs::rename(&from, &to).unwrap();

        assert!(next_change(&mut rx, &FileChangeEvent::Renamed { from, to }).await);
    }
}
