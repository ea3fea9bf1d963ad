//! Filesystem capability handler.
//!
//! Every operation takes a client-supplied path relative to the workspace
//! root. Paths are normalized lexically and then checked against the
//! canonical root so that neither `..` segments nor symlinks can reach
//! outside of it.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::CapabilityError;

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
}

/// Reply payload for `getDirectory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    /// The path exactly as the client requested it
    pub path: String,
    /// Entries in directory enumeration order
    pub entries: Vec<DirectoryEntry>,
}

impl DirectoryListing {
    pub fn empty(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }
}

/// Sandboxed view of the directory tree the client may manipulate.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at `root`, which must exist.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("workspace root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path to an absolute path inside the root.
    ///
    /// Leading separators are ignored, so `/Home` and `Home` name the same
    /// directory. A `..` that would climb above the root, or an existing
    /// ancestor that canonicalizes outside of it, yields `PathEscape`.
    pub async fn resolve(&self, relative: &str) -> Result<PathBuf, CapabilityError> {
        let candidate = normalize(&self.root, relative)?;
        self.verify_contained(&candidate, relative).await?;
        Ok(candidate)
    }

    /// Enumerate the immediate children of `path`.
    pub async fn list(&self, path: &str) -> Result<DirectoryListing, CapabilityError> {
        let dir = self.resolve(path).await?;

        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CapabilityError::NotFound(path.to_string()));
            }
            Err(e) => return Err(CapabilityError::Io(e)),
        };

        let mut listing = DirectoryListing::empty(path);
        while let Some(entry) = read_dir.next_entry().await? {
            let entry_path = entry.path();
            // Follow symlinks so a linked directory is reported as one.
            let is_directory = match fs::metadata(&entry_path).await {
                Ok(metadata) => metadata.is_dir(),
                Err(e) => {
                    debug!("Could not stat {}: {}", entry_path.display(), e);
                    false
                }
            };
            listing.entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory,
            });
        }

        Ok(listing)
    }

    /// Create `path` and any missing ancestors. Existing directories are left untouched.
    pub async fn create_directory(&self, path: &str) -> Result<(), CapabilityError> {
        let dir = self.resolve(path).await?;

        if fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            debug!("Directory already exists: {}", dir.display());
            return Ok(());
        }

        info!("Creating directory: {}", dir.display());
        fs::create_dir_all(&dir).await?;
        Ok(())
    }

    /// Recursively remove `path`. Removing something that is already gone succeeds.
    pub async fn delete_directory(&self, path: &str) -> Result<(), CapabilityError> {
        let target = self.resolve(path).await?;

        if target == self.root {
            warn!("Attempted to delete workspace root via {:?}", path);
            return Err(CapabilityError::InvalidPath(
                "Cannot delete workspace root".to_string(),
            ));
        }

        let metadata = match fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Nothing to delete at {}", target.display());
                return Ok(());
            }
            Err(e) => return Err(CapabilityError::Io(e)),
        };

        info!("Deleting: {}", target.display());

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&target).await
        } else {
            fs::remove_file(&target).await
        };

        match result {
            Ok(()) => Ok(()),
            // Lost a race with another deleter.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CapabilityError::Io(e)),
        }
    }

    /// Walk up from `candidate` to its deepest existing ancestor and make
    /// sure that ancestor, with symlinks resolved, is still under the root.
    async fn verify_contained(
        &self,
        candidate: &Path,
        requested: &str,
    ) -> Result<(), CapabilityError> {
        let mut probe = candidate;
        loop {
            if let Ok(canonical) = fs::canonicalize(probe).await {
                if canonical.starts_with(&self.root) {
                    return Ok(());
                }
                warn!(
                    "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
                    requested, canonical, self.root
                );
                return Err(CapabilityError::PathEscape(requested.to_string()));
            }

            probe = match probe.parent() {
                Some(parent) if parent.starts_with(&self.root) => parent,
                _ => return Err(CapabilityError::PathEscape(requested.to_string())),
            };
        }
    }
}

/// Lexically join `relative` onto `root`, resolving `.` and `..` without
/// touching the filesystem.
fn normalize(root: &Path, relative: &str) -> Result<PathBuf, CapabilityError> {
    if relative.contains('\0') {
        warn!("Path contains null byte: {:?}", relative);
        return Err(CapabilityError::InvalidPath(relative.replace('\0', "")));
    }

    let trimmed = relative.trim_start_matches(['/', '\\']);
    let mut segments: Vec<&OsStr> = Vec::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(name) => segments.push(name),
            Component::CurDir => continue,
            Component::ParentDir => {
                if segments.pop().is_none() {
                    warn!("Path traversal attempt detected: {:?}", relative);
                    return Err(CapabilityError::PathEscape(relative.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component in relative path: {:?}", relative);
                return Err(CapabilityError::PathEscape(relative.to_string()));
            }
        }
    }

    let mut result = root.to_path_buf();
    result.extend(segments);
    Ok(result)
}
