//! Per-invocation workspaces: one fresh directory per build context.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FnboxError, Result};

/// An exclusively owned build-context directory.
///
/// Not `Clone`: [`WorkspaceManager::release`] consumes it, so a workspace is
/// released at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Allocates and tears down workspaces under a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a workspace named `name` would occupy.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create a fresh, empty directory named `name`.
    ///
    /// Fails with [`FnboxError::Resource`] if it already exists or the root
    /// is not writable.
    pub async fn acquire(&self, name: &str) -> Result<Workspace> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| FnboxError::resource(&self.root, e))?;

        let path = self.path_for(name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "workspace acquired");
                Ok(Workspace { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(FnboxError::resource(path, "workspace already exists"))
            }
            Err(e) => Err(FnboxError::resource(path, e)),
        }
    }

    /// Remove the workspace tree. A missing directory counts as released.
    pub async fn release(&self, workspace: Workspace) -> Result<()> {
        match tokio::fs::remove_dir_all(&workspace.path).await {
            Ok(()) => {
                debug!(path = %workspace.path.display(), "workspace released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FnboxError::resource(workspace.path, e)),
        }
    }
}
