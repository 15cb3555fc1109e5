use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::{FrontendConfig, LayoutConfig};
use crate::error::{Error, Result};
use crate::targets::TargetId;

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    /// Toolchain working tree, shared by every target build.
    pub build_dir: PathBuf,
    /// Collected per-target artifact sets.
    pub builds_dir: PathBuf,
    pub configs_dir: PathBuf,
    /// Where the active overlay is copied for the toolchain to pick up.
    pub defaults_file: PathBuf,
    pub frontend_dir: PathBuf,
    pub dist_dir: PathBuf,
    pub headers_dir: PathBuf,
}

impl ProjectPaths {
    pub fn resolve(layout: &LayoutConfig, frontend: &FrontendConfig) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| Error::io(format!("cwd error: {e}")))?;
        Self::resolve_from(&cwd, layout, frontend)
    }

    pub fn resolve_from(base: &Path, layout: &LayoutConfig, frontend: &FrontendConfig) -> Result<Self> {
        let root = resolve_user_path(base, &layout.root_dir)?;
        Ok(Self {
            build_dir: resolve_user_dir(&root, &layout.build_dir)?,
            builds_dir: resolve_user_dir(&root, &layout.builds_dir)?,
            configs_dir: resolve_user_dir(&root, &layout.configs_dir)?,
            defaults_file: resolve_user_dir(&root, &layout.defaults_file)?,
            frontend_dir: resolve_user_dir(&root, &frontend.dir)?,
            dist_dir: resolve_user_dir(&root, &frontend.dist_dir)?,
            headers_dir: resolve_user_dir(&root, &frontend.headers_dir)?,
            root,
        })
    }

    /// `builds/<target>`
    pub fn artifact_dir(&self, target: TargetId) -> PathBuf {
        self.builds_dir.join(target.as_str())
    }
}

fn resolve_user_dir(root: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::config("empty layout path"));
    }
    let pb = PathBuf::from(p);
    if pb.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::config(format!(
            "invalid layout path '{}' (contains '..')",
            p
        )));
    }
    Ok(if pb.is_absolute() { pb } else { root.join(pb) })
}

fn resolve_user_path(base: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::config("empty root_dir"));
    }
    let pb = PathBuf::from(p);
    Ok(if pb.is_absolute() { pb } else { base.join(pb) })
}

pub(crate) fn safe_remove_dir_all(root: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let root_can = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir_can = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if dir_can == root_can || !dir_can.starts_with(&root_can) {
        return Err(Error::io(format!(
            "refusing to remove '{}' (not inside project root '{}')",
            dir_can.display(),
            root_can.display()
        )));
    }
    fs::remove_dir_all(&dir_can)
        .map_err(|e| Error::io(format!("failed to remove dir {}: {e}", dir_can.display())))
}

static HELD_BUILD_DIRS: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

fn held_dirs() -> MutexGuard<'static, BTreeSet<PathBuf>> {
    // A poisoned set is still a valid set.
    HELD_BUILD_DIRS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive ownership of the shared toolchain build directory for one
/// pipeline run. Acquiring clears any leftover tree; dropping clears it again
/// and releases ownership, on every exit path.
#[derive(Debug)]
pub struct BuildDirLease {
    root: PathBuf,
    dir: PathBuf,
}

impl BuildDirLease {
    pub fn acquire(root: &Path, dir: &Path) -> Result<Self> {
        {
            let mut held = held_dirs();
            if !held.insert(dir.to_path_buf()) {
                return Err(Error::precondition(format!(
                    "build directory {} is owned by another running pipeline",
                    dir.display()
                )));
            }
        }
        let lease = Self {
            root: root.to_path_buf(),
            dir: dir.to_path_buf(),
        };
        if lease.dir.exists() {
            tracing::debug!(dir = %lease.dir.display(), "removing stale build directory");
        }
        // On failure the lease drops here and releases ownership.
        safe_remove_dir_all(&lease.root, &lease.dir)?;
        Ok(lease)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for BuildDirLease {
    fn drop(&mut self) {
        if let Err(e) = safe_remove_dir_all(&self.root, &self.dir) {
            tracing::warn!("failed to clear build directory on release: {e}");
        }
        held_dirs().remove(&self.dir);
    }
}
