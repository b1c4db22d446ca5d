//! Per-run workspace
//!
//! A workspace is a fresh directory owned by exactly one pipeline run. All
//! commands run inside it and every file name handed to it is resolved
//! relative to its root. Names that would leave the root are rejected.
//!
//! The directory is removed when the workspace is dropped, so every exit path
//! of a run (success, error, timeout, dropped future) cleans up.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Prefix of every workspace directory name
pub const WORKSPACE_PREFIX: &str = "fpga-compile-";

/// Isolated directory for one pipeline run
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    root: PathBuf,
    files: BTreeSet<String>,
    destroyed: bool,
}

impl Workspace {
    /// Allocates a new uniquely named directory under `base`
    pub async fn create(base: &Path) -> Result<Self> {
        let id = Uuid::new_v4();
        let root = base.join(format!("{}{}", WORKSPACE_PREFIX, id));

        tokio::fs::create_dir_all(base)
            .await
            .map_err(|e| PipelineError::resource("Failed to create work directory", e))?;

        // create_dir (not create_dir_all) so an existing directory is an error
        tokio::fs::create_dir(&root)
            .await
            .map_err(|e| PipelineError::resource("Failed to create work directory", e))?;

        info!(workspace = %id, path = %root.display(), "Created workspace");

        Ok(Self {
            id,
            root,
            files: BTreeSet::new(),
            destroyed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the files written through this workspace
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    /// Writes `bytes` to `name` under the root, creating parent directories
    pub async fn write_file(&mut self, name: &str, bytes: impl AsRef<[u8]>) -> Result<()> {
        let path = self.resolve(name)?;

        if let Some(parent) = path.parent() {
            if parent != self.root {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PipelineError::resource(format!("Failed to write file {}", name), e)
                })?;
            }
        }

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::resource(format!("Failed to write file {}", name), e))?;

        debug!(workspace = %self.id, file = %name, "Wrote workspace file");
        self.files.insert(name.to_string());
        Ok(())
    }

    /// Reads `name` from under the root
    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::resource(format!("Failed to read file {}", name), e))
    }

    /// Removes the workspace directory on the blocking pool
    ///
    /// Dropping the workspace without calling this removes it inline.
    pub async fn destroy(mut self) {
        self.destroyed = true;
        let id = self.id;
        let root = self.root.clone();

        if let Err(e) = tokio::task::spawn_blocking(move || remove_root(id, &root)).await {
            warn!(workspace = %id, error = %e, "Workspace removal task failed");
        }
    }

    /// Maps a caller-supplied name to a path inside the root
    ///
    /// Only plain relative names are accepted. Absolute paths and any `..`
    /// component are rejected rather than rewritten.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let mut has_normal = false;

        for component in relative.components() {
            match component {
                Component::Normal(_) => has_normal = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    warn!(workspace = %self.id, file = %name, "Rejected file name outside workspace");
                    return Err(PipelineError::rejected(format!(
                        "Invalid file name {}",
                        name
                    )));
                }
            }
        }

        if !has_normal {
            return Err(PipelineError::rejected(format!(
                "Invalid file name {:?}",
                name
            )));
        }

        Ok(self.root.join(relative))
    }
}

/// Best-effort recursive removal; failures are logged, never surfaced
fn remove_root(id: Uuid, root: &Path) {
    match std::fs::remove_dir_all(root) {
        Ok(()) => debug!(workspace = %id, "Workspace removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(workspace = %id, "Workspace already gone")
        }
        Err(e) => warn!(
            workspace = %id,
            path = %root.display(),
            error = %e,
            "Failed to remove workspace"
        ),
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            remove_root(self.id, &self.root);
        }
    }
}
