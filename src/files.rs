//! Asset file collaborator.
//!
//! The catalog records repo-relative paths (`data/images/...`) in the state
//! document; this store resolves them against the base directory and owns
//! the actual reads, writes, and best-effort deletes. The state document
//! itself never goes through here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

pub const ORIGINALS_SUBDIR: &str = "data/images/originals";
pub const PROCESSED_SUBDIR: &str = "data/images/processed";

#[derive(Debug, Clone)]
pub struct AssetStore {
    base_dir: PathBuf,
}

impl AssetStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the data directories the catalog writes into.
    pub fn ensure_layout(&self) -> Result<()> {
        for subdir in [ORIGINALS_SUBDIR, PROCESSED_SUBDIR] {
            let dir = self.base_dir.join(subdir);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Absolute paths pass through; relative ones are anchored at the base
    /// directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    /// Where an uploaded original lands, relative to the base directory.
    pub fn original_rel_path(&self, id: &str, suffix: &str) -> String {
        format!("{ORIGINALS_SUBDIR}/{id}{suffix}")
    }

    /// Where a processed asset lands, relative to the base directory.
    pub fn processed_rel_path(&self, id: &str) -> String {
        format!("{PROCESSED_SUBDIR}/{id}.png")
    }

    pub fn write(&self, path: &str, bytes: &[u8]) -> Result<PathBuf> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&full, bytes).with_context(|| format!("failed to write {}", full.display()))?;
        debug!(path = %full.display(), bytes = bytes.len(), "wrote asset");
        Ok(full)
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        fs::read(&full).with_context(|| format!("failed to read {}", full.display()))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    /// Remove an asset if it is still there; a missing file is not an error.
    pub fn remove_best_effort(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        if !full.exists() {
            debug!(path = %full.display(), "remove: source missing; skipping");
            return Ok(());
        }
        match fs::remove_file(&full) {
            Ok(()) => {
                info!(path = %full.display(), "removed asset");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %full.display(), "remove: source vanished during remove; skipping");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", full.display())),
        }
    }
}
