//! Path validation for every filesystem access made on behalf of a request.
//!
//! Two trust modes exist. [`TrustMode::Sandboxed`] paths must stay inside the
//! project root; this is what the server writes to. [`TrustMode::TrustedExternal`]
//! paths are directories the user pointed at explicitly (scope directories for
//! agent context) and may live anywhere, but must exist.
//!
//! Normalization always happens before the trust decision.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Trust level a caller requests for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrustMode {
    /// Must resolve inside the project root.
    Sandboxed,
    /// May point anywhere, but must be an existing directory.
    TrustedExternal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid path: {0}")]
    Invalid(String),

    #[error("Access denied: {0} is outside the project root")]
    AccessDenied(String),

    #[error("Directory does not exist: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

impl PathError {
    pub fn code(&self) -> &'static str {
        match self {
            PathError::Invalid(_) => "VALIDATION_ERROR",
            PathError::AccessDenied(_) => "ACCESS_DENIED",
            PathError::NotFound(_) => "NOT_FOUND",
            PathError::NotADirectory(_) => "NOT_A_DIRECTORY",
        }
    }
}

/// Wire form of a validation outcome.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl From<Result<PathBuf, PathError>> for PathValidation {
    fn from(result: Result<PathBuf, PathError>) -> Self {
        match result {
            Ok(path) => Self {
                valid: true,
                path: Some(display_path(&path)),
                error: None,
                code: None,
            },
            Err(err) => Self {
                valid: false,
                path: None,
                error: Some(err.to_string()),
                code: Some(err.code()),
            },
        }
    }
}

/// Resolves request paths against a fixed project root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    /// Symlink-free form of `root`, when the root exists.
    canonical_root: Option<PathBuf>,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = lexical_clean(&root.into());
        let canonical_root = root.canonicalize().ok();
        Self {
            root,
            canonical_root,
        }
    }

    /// Resolver confined to another directory, typically a validated scope.
    pub fn with_root(&self, root: &Path) -> Self {
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `raw` under the requested trust mode.
    ///
    /// Returns the normalized absolute path. Sandboxed paths are not required
    /// to exist; trusted-external paths must be existing directories.
    pub fn validate(&self, raw: &str, mode: TrustMode) -> Result<PathBuf, PathError> {
        let resolved = normalize(raw, &self.root)?;

        match mode {
            TrustMode::Sandboxed => {
                if !is_within(&resolved, &self.root, case_insensitive_paths()) {
                    warn!("Sandbox violation: {:?} resolved to {:?}", raw, resolved);
                    return Err(PathError::AccessDenied(display_path(&resolved)));
                }
                self.verify_no_escape(&resolved)?;
            }
            TrustMode::TrustedExternal => match std::fs::metadata(&resolved) {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => return Err(PathError::NotADirectory(display_path(&resolved))),
                Err(_) => return Err(PathError::NotFound(display_path(&resolved))),
            },
        }

        debug!("Validated {:?} as {:?} ({:?})", raw, resolved, mode);
        Ok(resolved)
    }

    /// Path relative to the root with forward slashes, empty for the root itself.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(display_path)
            .unwrap_or_else(|_| display_path(path))
    }

    /// Re-check containment after following symlinks.
    ///
    /// The nearest existing ancestor is canonicalized so a path that does not
    /// exist yet cannot be created through a symlinked parent either.
    fn verify_no_escape(&self, resolved: &Path) -> Result<(), PathError> {
        let Some(canonical_root) = &self.canonical_root else {
            return Ok(());
        };

        let Some(existing) = resolved.ancestors().find(|p| p.exists()) else {
            return Ok(());
        };

        let canonical = existing
            .canonicalize()
            .map_err(|err| PathError::Invalid(err.to_string()))?;

        if !is_within(&canonical, canonical_root, case_insensitive_paths()) {
            warn!(
                "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
                resolved, canonical, canonical_root
            );
            return Err(PathError::AccessDenied(display_path(resolved)));
        }

        Ok(())
    }
}

/// Convert separators and resolve `.`/`..` against `base`.
pub fn normalize(raw: &str, base: &Path) -> Result<PathBuf, PathError> {
    if raw.trim().is_empty() {
        return Err(PathError::Invalid("path is empty".to_string()));
    }
    if raw.contains('\0') {
        return Err(PathError::Invalid("path contains a null byte".to_string()));
    }

    let unified = raw.replace('\\', "/");
    let candidate = Path::new(&unified);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };

    Ok(lexical_clean(&joined))
}

/// Resolve `.` and `..` without touching the filesystem. `..` never climbs
/// above the filesystem root.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

fn case_insensitive_paths() -> bool {
    cfg!(windows)
}

/// Component-wise prefix test.
fn is_within(path: &Path, root: &Path, case_insensitive: bool) -> bool {
    if !case_insensitive {
        return path.starts_with(root);
    }

    let fold = |p: &Path| -> Vec<String> {
        p.components()
            .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
            .collect()
    };
    let path = fold(path);
    let root = fold(root);
    path.len() >= root.len() && path[..root.len()] == root[..]
}

/// Forward-slash display form used in responses.
pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Reduce a client-supplied file name to a single safe path component.
pub fn sanitize_filename(filename: &str) -> Result<String, PathError> {
    let cleaned: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if cleaned.is_empty() {
        return Err(PathError::Invalid(format!("invalid filename: {filename:?}")));
    }

    let stem = cleaned
        .split('.')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    let reserved = matches!(stem.as_str(), "CON" | "PRN" | "AUX" | "NUL")
        || ((stem.starts_with("COM") || stem.starts_with("LPT"))
            && stem.len() == 4
            && stem.as_bytes()[3].is_ascii_digit()
            && stem.as_bytes()[3] != b'0');
    if reserved {
        return Err(PathError::Invalid(format!("reserved filename: {filename:?}")));
    }

    Ok(cleaned.chars().take(255).collect())
}
