//! File and directory operations on behalf of the editor.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{ApiJson, ApiResult, success};
use crate::AppState;
use crate::config::Config;
use crate::error::BridgeError;
use crate::paths::{TrustMode, display_path, sanitize_filename};
use crate::schema::{self, ProjectGroup};

/// Upper bound on entries returned by a recursive scope listing.
const MAX_SCOPE_ENTRIES: usize = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileRequest {
    pub path: String,
    /// Confine the read to this trusted scope instead of the project root
    pub scope_directory: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveFileRequest {
    pub filename: String,
    pub content: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFile {
    pub path: String,
    pub page_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoadFileRequest {
    pub filename: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedFile {
    pub filename: String,
    pub legacy: bool,
    pub data: ProjectGroup,
}

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct PathResponse {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct EnsureResponse {
    pub path: String,
    pub created: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: u64,
}

#[derive(Debug, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    pub entries: Vec<DirectoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MoveFilesRequest {
    pub files: Vec<String>,
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct MovedFiles {
    pub moved: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveAutomationRequest {
    pub directory: String,
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeFilesRequest {
    pub scope_directory: String,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ScopeFile {
    pub path: String,
    pub size: u64,
    pub modified: u64,
}

#[derive(Debug, Serialize)]
pub struct ScopeListing {
    pub root: String,
    pub files: Vec<ScopeFile>,
    pub truncated: bool,
}

// ============================================================================
// Helper functions
// ============================================================================

fn io_error(err: std::io::Error, path: &Path) -> BridgeError {
    match err.kind() {
        ErrorKind::NotFound => BridgeError::not_found(format!("Not found: {}", display_path(path))),
        ErrorKind::PermissionDenied => {
            BridgeError::AccessDenied(format!("Permission denied: {}", display_path(path)))
        }
        _ => BridgeError::Io(err),
    }
}

fn modified_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn ensure_size(state: &AppState, size: u64) -> Result<(), BridgeError> {
    let limit = state.config.max_file_size;
    if size > limit {
        return Err(BridgeError::validation(format!(
            "File too large: {size} bytes exceeds limit of {limit} bytes"
        )));
    }
    Ok(())
}

/// Saved specifications always carry a `.json` extension.
fn spec_filename(raw: &str) -> Result<String, BridgeError> {
    let name = sanitize_filename(raw)?;
    if name.to_ascii_lowercase().ends_with(".json") {
        Ok(name)
    } else {
        Ok(format!("{name}.json"))
    }
}

fn spec_path(state: &AppState, filename: &str) -> Result<PathBuf, BridgeError> {
    let relative = format!("{}/{}", state.config.specs_dir, spec_filename(filename)?);
    Ok(state.paths.validate(&relative, TrustMode::Sandboxed)?)
}

async fn existing_directory(path: &Path) -> Result<(), BridgeError> {
    let metadata = fs::metadata(path).await.map_err(|e| io_error(e, path))?;
    if !metadata.is_dir() {
        return Err(BridgeError::NotADirectory(display_path(path)));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/file/read
pub async fn read_file(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ReadFileRequest>,
) -> ApiResult<FileContent> {
    let path = match request.scope_directory.as_deref() {
        Some(scope) => {
            let scope = state.paths.validate(scope, TrustMode::TrustedExternal)?;
            state
                .paths
                .with_root(&scope)
                .validate(&request.path, TrustMode::Sandboxed)?
        }
        None => state.paths.validate(&request.path, TrustMode::Sandboxed)?,
    };

    let metadata = fs::metadata(&path).await.map_err(|e| io_error(e, &path))?;
    if metadata.is_dir() {
        return Err(BridgeError::validation(format!(
            "Path is a directory: {}",
            display_path(&path)
        )));
    }
    ensure_size(&state, metadata.len())?;

    let bytes = fs::read(&path).await.map_err(|e| io_error(e, &path))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| BridgeError::validation("File is not valid UTF-8 text"))?;

    debug!("Read {} ({} bytes)", path.display(), metadata.len());

    Ok(success(FileContent {
        mime_type: mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string(),
        path: display_path(&path),
        size: metadata.len(),
        content,
    }))
}

/// POST /api/file/save
pub async fn save_file(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SaveFileRequest>,
) -> ApiResult<SavedFile> {
    let group = schema::validate_document(request.content)?;
    let path = spec_path(&state, &request.filename)?;

    let body = serde_json::to_string_pretty(&group)?;
    ensure_size(&state, body.len() as u64)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(e, parent))?;
    }
    fs::write(&path, body).await.map_err(|e| io_error(e, &path))?;

    info!("Saved specification {}", path.display());
    Ok(success(SavedFile {
        path: state.paths.relative(&path),
        page_count: group.page_count(),
    }))
}

/// POST /api/file/load
pub async fn load_file(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoadFileRequest>,
) -> ApiResult<LoadedFile> {
    let path = spec_path(&state, &request.filename)?;

    let metadata = fs::metadata(&path).await.map_err(|e| io_error(e, &path))?;
    ensure_size(&state, metadata.len())?;
    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| io_error(e, &path))?;

    let group = schema::validate_str(&content).inspect_err(|err| {
        warn!("Rejected specification {}: {}", path.display(), err);
    })?;

    Ok(success(LoadedFile {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        legacy: group.is_legacy(),
        data: group,
    }))
}

/// POST /api/file/delete
pub async fn delete_file(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PathRequest>,
) -> ApiResult<PathResponse> {
    let path = state.paths.validate(&request.path, TrustMode::Sandboxed)?;
    if path == state.paths.root() {
        return Err(BridgeError::AccessDenied(
            "Cannot delete the project root".to_string(),
        ));
    }

    let metadata = fs::symlink_metadata(&path)
        .await
        .map_err(|e| io_error(e, &path))?;
    if metadata.is_dir() {
        return Err(BridgeError::validation(format!(
            "Path is a directory: {}",
            display_path(&path)
        )));
    }

    fs::remove_file(&path).await.map_err(|e| io_error(e, &path))?;
    info!("Deleted {}", path.display());

    Ok(success(PathResponse {
        path: state.paths.relative(&path),
    }))
}

/// POST /api/directory/create
pub async fn create_directory(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PathRequest>,
) -> ApiResult<PathResponse> {
    let path = state.paths.validate(&request.path, TrustMode::Sandboxed)?;

    fs::create_dir(&path).await.map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => {
            BridgeError::validation(format!("Already exists: {}", display_path(&path)))
        }
        _ => io_error(e, &path),
    })?;
    info!("Created directory {}", path.display());

    Ok(success(PathResponse {
        path: state.paths.relative(&path),
    }))
}

/// POST /api/directory/ensure
pub async fn ensure_directory(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PathRequest>,
) -> ApiResult<EnsureResponse> {
    let path = state.paths.validate(&request.path, TrustMode::Sandboxed)?;

    let created = match fs::metadata(&path).await {
        Ok(metadata) if metadata.is_dir() => false,
        Ok(_) => return Err(BridgeError::NotADirectory(display_path(&path))),
        Err(_) => {
            fs::create_dir_all(&path)
                .await
                .map_err(|e| io_error(e, &path))?;
            debug!("Ensured directory {}", path.display());
            true
        }
    };

    Ok(success(EnsureResponse {
        path: state.paths.relative(&path),
        created,
    }))
}

/// POST /api/directory/list
pub async fn list_directory(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PathRequest>,
) -> ApiResult<DirectoryListing> {
    let path = state.paths.validate(&request.path, TrustMode::Sandboxed)?;
    existing_directory(&path).await?;

    let mut entries = Vec::new();
    let mut dir = fs::read_dir(&path).await.map_err(|e| io_error(e, &path))?;
    while let Some(entry) = dir.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        entries.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            is_directory: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: modified_millis(&metadata),
        });
    }

    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(success(DirectoryListing {
        path: state.paths.relative(&path),
        entries,
    }))
}

/// POST /api/files/move
///
/// Every source and the destination are validated before anything moves.
pub async fn move_files(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<MoveFilesRequest>,
) -> ApiResult<MovedFiles> {
    if request.files.is_empty() {
        return Err(BridgeError::validation("No files to move"));
    }

    let destination = state
        .paths
        .validate(&request.destination, TrustMode::Sandboxed)?;
    existing_directory(&destination).await?;

    let mut plan = Vec::with_capacity(request.files.len());
    for raw in &request.files {
        let source = state.paths.validate(raw, TrustMode::Sandboxed)?;
        let metadata = fs::metadata(&source)
            .await
            .map_err(|e| io_error(e, &source))?;
        if !metadata.is_file() {
            return Err(BridgeError::validation(format!(
                "Not a file: {}",
                display_path(&source)
            )));
        }

        let name = source
            .file_name()
            .ok_or_else(|| BridgeError::validation(format!("Invalid file: {raw}")))?;
        let target = destination.join(name);
        if fs::try_exists(&target).await.unwrap_or(false) {
            return Err(BridgeError::validation(format!(
                "Destination already has {}",
                name.to_string_lossy()
            )));
        }
        plan.push((source, target));
    }

    let mut moved = Vec::with_capacity(plan.len());
    for (source, target) in plan {
        fs::rename(&source, &target)
            .await
            .map_err(|e| io_error(e, &source))?;
        debug!("Moved {} -> {}", source.display(), target.display());
        moved.push(state.paths.relative(&target));
    }

    info!("Moved {} file(s) into {}", moved.len(), destination.display());
    Ok(success(MovedFiles { moved }))
}

/// POST /api/automation/save
pub async fn save_automation_file(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SaveAutomationRequest>,
) -> ApiResult<PathResponse> {
    let directory = state
        .paths
        .validate(&request.directory, TrustMode::Sandboxed)?;
    let filename = sanitize_filename(&request.filename)?;
    ensure_size(&state, request.content.len() as u64)?;

    fs::create_dir_all(&directory)
        .await
        .map_err(|e| io_error(e, &directory))?;

    let path = directory.join(&filename);
    fs::write(&path, request.content.as_bytes())
        .await
        .map_err(|e| io_error(e, &path))?;

    info!("Saved automation file {}", path.display());
    Ok(success(PathResponse {
        path: state.paths.relative(&path),
    }))
}

/// POST /api/scope/files
pub async fn list_scope_files(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ScopeFilesRequest>,
) -> ApiResult<ScopeListing> {
    let scope = state
        .paths
        .validate(&request.scope_directory, TrustMode::TrustedExternal)?;
    let max_depth = request
        .max_depth
        .unwrap_or(state.config.max_depth)
        .min(state.config.max_depth);

    let config = state.config.clone();
    let walk_root = scope.clone();
    let (files, truncated) =
        tokio::task::spawn_blocking(move || walk_scope(&config, &walk_root, max_depth))
            .await
            .map_err(|err| BridgeError::Io(std::io::Error::other(err.to_string())))?;

    Ok(success(ScopeListing {
        root: display_path(&scope),
        files,
        truncated,
    }))
}

fn walk_scope(config: &Config, root: &Path, max_depth: usize) -> (Vec<ScopeFile>, bool) {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !config.is_hidden_dir(&entry.file_name().to_string_lossy())
        });

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if files.len() >= MAX_SCOPE_ENTRIES {
            return (files, true);
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        files.push(ScopeFile {
            path: display_path(relative),
            size: metadata.len(),
            modified: modified_millis(&metadata),
        });
    }

    (files, false)
}
