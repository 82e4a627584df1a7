//! Recursive directory watches for automation workflows.
//!
//! Each watch is identified by a [`WatchKey`] and owns one OS watch handle.
//! Raw notify events are reconciled against a per-file (mtime, size) map so
//! only genuine content changes are published.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::paths::{PathError, PathResolver, TrustMode, display_path};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CHANGE_BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Watcher not found: {0}")]
    NotFound(String),

    #[error("Failed to watch directory: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of one live watch: (owner, purpose, directory).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub owner_id: String,
    pub purpose_id: String,
    pub directory: PathBuf,
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.owner_id,
            self.purpose_id,
            display_path(&self.directory)
        )
    }
}

/// Last observed (modified time, size) of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub modified_ms: u64,
    pub size: u64,
}

impl FileState {
    fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            modified_ms: metadata.modified().map(unix_millis).unwrap_or(0),
            size: metadata.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A real change detected under a watched directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub key: String,
    /// Path relative to the watched directory
    pub path: String,
    pub kind: ChangeKind,
}

/// Snapshot entry returned by [`DirectoryWatcherManager::list_files`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub modified: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStarted {
    pub key: String,
    pub already_watching: bool,
}

type FileStates = Arc<Mutex<HashMap<String, FileState>>>;

struct WatcherRecord {
    key: WatchKey,
    // Dropping the watcher closes the OS handle.
    _watcher: RecommendedWatcher,
    states: FileStates,
    task: JoinHandle<()>,
}

impl Drop for WatcherRecord {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct DirectoryWatcherManager {
    paths: PathResolver,
    records: tokio::sync::Mutex<HashMap<String, WatcherRecord>>,
    changes: broadcast::Sender<FileChange>,
}

impl DirectoryWatcherManager {
    pub fn new(paths: PathResolver) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BROADCAST_CAPACITY);
        Self {
            paths,
            records: tokio::sync::Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Start watching `directory` for (owner, purpose).
    ///
    /// A second call with the same key reuses the live handle and reports
    /// `already_watching`; its file baseline is re-taken from disk.
    pub async fn start_watch(
        &self,
        directory: &str,
        owner_id: &str,
        purpose_id: &str,
    ) -> Result<WatchStarted, WatchError> {
        let owner_id = owner_id.trim();
        let purpose_id = purpose_id.trim();
        if owner_id.is_empty() || purpose_id.is_empty() {
            return Err(WatchError::InvalidRequest(
                "ownerId and purposeId are required".to_string(),
            ));
        }

        let directory = self.existing_directory(directory).await?;
        let key = WatchKey {
            owner_id: owner_id.to_string(),
            purpose_id: purpose_id.to_string(),
            directory,
        };
        let key_str = key.to_string();

        let mut records = self.records.lock().await;

        if let Some(record) = records.get(&key_str) {
            let baseline = scan(&record.key.directory).await?;
            *lock_states(&record.states) = baseline;
            debug!("Already watching {}, baseline refreshed", key_str);
            return Ok(WatchStarted {
                key: key_str,
                already_watching: true,
            });
        }

        let states: FileStates = Arc::new(Mutex::new(scan(&key.directory).await?));

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if tx.blocking_send(res).is_err() {
                debug!("File watch channel closed");
            }
        })?;
        watcher.watch(&key.directory, RecursiveMode::Recursive)?;

        let task = tokio::spawn(process_events(
            rx,
            key.directory.clone(),
            key_str.clone(),
            states.clone(),
            self.changes.clone(),
        ));

        info!(
            "Watching {} ({} files tracked)",
            key_str,
            lock_states(&states).len()
        );

        records.insert(
            key_str.clone(),
            WatcherRecord {
                key,
                _watcher: watcher,
                states,
                task,
            },
        );

        Ok(WatchStarted {
            key: key_str,
            already_watching: false,
        })
    }

    pub async fn stop_watch(&self, key: &str) -> Result<(), WatchError> {
        let record = self.records.lock().await.remove(key);
        match record {
            Some(record) => {
                info!("Stopped watching {}", record.key);
                Ok(())
            }
            None => Err(WatchError::NotFound(key.to_string())),
        }
    }

    /// Close every live watch. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let closed: Vec<WatcherRecord> = self.records.lock().await.drain().map(|(_, r)| r).collect();
        let count = closed.len();
        drop(closed);
        if count > 0 {
            info!("Closed {} directory watcher(s)", count);
        }
        count
    }

    /// Non-recursive snapshot of the regular files in `directory`.
    pub async fn list_files(&self, directory: &str) -> Result<Vec<FileInfo>, WatchError> {
        let directory = self.existing_directory(directory).await?;

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Removed between readdir and stat.
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(FileInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                size: metadata.len(),
                modified: metadata.modified().map(unix_millis).unwrap_or(0),
                created: metadata.created().ok().map(unix_millis),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileChange> {
        self.changes.subscribe()
    }

    pub async fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of the tracked file states for `key`.
    pub async fn file_states(&self, key: &str) -> Option<HashMap<String, FileState>> {
        let records = self.records.lock().await;
        records.get(key).map(|record| lock_states(&record.states).clone())
    }

    async fn existing_directory(&self, raw: &str) -> Result<PathBuf, WatchError> {
        let directory = self.paths.validate(raw, TrustMode::Sandboxed)?;
        match fs::metadata(&directory).await {
            Ok(metadata) if metadata.is_dir() => Ok(directory),
            Ok(_) => Err(PathError::NotADirectory(display_path(&directory)).into()),
            Err(_) => Err(PathError::NotFound(display_path(&directory)).into()),
        }
    }
}

async fn process_events(
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    root: PathBuf,
    key: String,
    states: FileStates,
    changes: broadcast::Sender<FileChange>,
) {
    while let Some(incoming) = rx.recv().await {
        let event = match incoming {
            Ok(event) => event,
            Err(err) => {
                warn!("Watcher error for {}: {:?}", key, err);
                continue;
            }
        };

        if matches!(event.kind, EventKind::Access(_)) {
            continue;
        }

        for path in event.paths {
            let Some(relative) = relative_key(&root, &path) else {
                continue;
            };

            let observed = match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_dir() => match scan_under(&root, &path).await {
                    Ok(files) => Observed::Directory(files),
                    Err(err) => {
                        warn!("Rescan of {} failed: {}", path.display(), err);
                        continue;
                    }
                },
                Ok(metadata) => Observed::File(FileState::from_metadata(&metadata)),
                Err(err) => {
                    debug!("Stat failed for {}, treating as removed: {}", path.display(), err);
                    Observed::Missing
                }
            };

            let detected = apply_observation(&mut lock_states(&states), &relative, observed);
            for (path, kind) in detected {
                debug!("{} {:?} {}", key, kind, path);
                // No subscribers is fine.
                let _ = changes.send(FileChange {
                    key: key.clone(),
                    path,
                    kind,
                });
            }
        }
    }
}

/// Apply one observation to the state map and classify it.
///
/// `None` means the file could not be stat'ed and is treated as deleted.
fn reconcile(
    states: &mut HashMap<String, FileState>,
    relative: &str,
    observed: Option<FileState>,
) -> Option<ChangeKind> {
    match observed {
        Some(state) => match states.insert(relative.to_string(), state) {
            None => Some(ChangeKind::Created),
            Some(previous) if previous != state => Some(ChangeKind::Modified),
            Some(_) => None,
        },
        None => states.remove(relative).map(|_| ChangeKind::Deleted),
    }
}

/// What a stat of an event path found.
enum Observed {
    File(FileState),
    /// Every file below a directory, keyed relative to the watch root
    Directory(HashMap<String, FileState>),
    Missing,
}

/// Apply one event path to the state map. A directory stands for every file
/// below it, so moving a whole tree in or out reports each file.
fn apply_observation(
    states: &mut HashMap<String, FileState>,
    relative: &str,
    observed: Observed,
) -> Vec<(String, ChangeKind)> {
    let prefix = format!("{relative}/");
    let mut detected = Vec::new();

    let present = match observed {
        Observed::File(state) => {
            if let Some(kind) = reconcile(states, relative, Some(state)) {
                detected.push((relative.to_string(), kind));
            }
            return detected;
        }
        Observed::Directory(files) => files,
        Observed::Missing => HashMap::new(),
    };

    // Either way nothing is a plain file at `relative` any more.
    if let Some(kind) = reconcile(states, relative, None) {
        detected.push((relative.to_string(), kind));
    }

    let mut vanished: Vec<String> = states
        .keys()
        .filter(|path| path.starts_with(&prefix) && !present.contains_key(*path))
        .cloned()
        .collect();
    vanished.sort();
    for path in vanished {
        if let Some(kind) = reconcile(states, &path, None) {
            detected.push((path, kind));
        }
    }

    let mut found: Vec<(String, FileState)> = present.into_iter().collect();
    found.sort_by(|a, b| a.0.cmp(&b.0));
    for (path, state) in found {
        if let Some(kind) = reconcile(states, &path, Some(state)) {
            detected.push((path, kind));
        }
    }

    detected
}

async fn scan(root: &Path) -> Result<HashMap<String, FileState>, WatchError> {
    scan_under(root, root).await
}

/// Files below `dir`, keyed relative to `root`.
async fn scan_under(root: &Path, dir: &Path) -> Result<HashMap<String, FileState>, WatchError> {
    let root = root.to_path_buf();
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || scan_blocking(&root, &dir))
        .await
        .map_err(|err| WatchError::Io(std::io::Error::other(err.to_string())))
}

fn scan_blocking(root: &Path, dir: &Path) -> HashMap<String, FileState> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let relative = relative_key(root, entry.path())?;
            Some((relative, FileState::from_metadata(&metadata)))
        })
        .collect()
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let relative = display_path(relative);
    (!relative.is_empty()).then_some(relative)
}

fn lock_states(
    states: &Mutex<HashMap<String, FileState>>,
) -> std::sync::MutexGuard<'_, HashMap<String, FileState>> {
    states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
