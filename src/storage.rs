//! Where uploaded scene files live while the engine uses them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context as _;

use crate::foundation::error::{ScenecamError, ScenecamResult};

/// A scene file written by [`SceneStorage::put`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredScene {
    /// Location the engine can open.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Persists uploaded scene bytes so the engine can open them by path.
pub trait SceneStorage: Send + Sync {
    /// Store `bytes` under a fresh name.
    fn put(&self, bytes: &[u8]) -> ScenecamResult<StoredScene>;

    /// Delete a file previously returned by [`SceneStorage::put`].
    fn remove(&self, path: &Path) -> ScenecamResult<()>;
}

/// Stores scenes as `<n>.blend` in one directory.
#[derive(Debug)]
pub struct FsSceneStorage {
    root: PathBuf,
    next: AtomicU64,
}

impl FsSceneStorage {
    /// Storage rooted at `root`, created if missing. Numbering continues after existing files.
    pub fn new(root: impl Into<PathBuf>) -> ScenecamResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create scene directory '{}'", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to resolve scene directory '{}'", root.display()))?;

        let mut last = 0;
        let entries = std::fs::read_dir(&root)
            .with_context(|| format!("failed to list scene directory '{}'", root.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "blend")
                && let Some(n) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u64>().ok())
            {
                last = last.max(n);
            }
        }
        Ok(Self {
            root,
            next: AtomicU64::new(last + 1),
        })
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SceneStorage for FsSceneStorage {
    fn put(&self, bytes: &[u8]) -> ScenecamResult<StoredScene> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let path = self.root.join(format!("{n}.blend"));
        let partial = self.root.join(format!("{n}.blend.part"));
        std::fs::write(&partial, bytes)
            .with_context(|| format!("failed to write scene file '{}'", partial.display()))?;
        std::fs::rename(&partial, &path)
            .with_context(|| format!("failed to move scene file to '{}'", path.display()))?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "scene stored");
        Ok(StoredScene {
            path,
            size: bytes.len() as u64,
        })
    }

    fn remove(&self, path: &Path) -> ScenecamResult<()> {
        if path.parent() != Some(self.root.as_path()) {
            return Err(ScenecamError::validation(format!(
                "'{}' is not in scene storage",
                path.display()
            )));
        }
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove scene file '{}'", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/storage/storage.rs"]
mod tests;
