//! Scoped per-job scratch directories.
//!
//! A [`Workspace`] owns a fresh directory under the configured work root. The
//! directory tree is removed when the value is dropped, on every exit path.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::Result;

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl Workspace {
    /// Create `<work_root>/job-XXXXXX/`.
    pub fn create(work_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_root)?;
        let dir = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(work_root)?;
        let root = dir.path().to_path_buf();
        debug!(workspace = %root.display(), "workspace created");
        Ok(Self {
            dir: Some(dir),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Where the uploaded file is stored, using a sanitized file name.
    pub fn upload_path(&self, file_name: &str) -> PathBuf {
        self.root.join(sanitize_filename(file_name))
    }

    /// Directory archives are expanded into.
    pub fn extract_dir(&self) -> PathBuf {
        self.root.join("extracted")
    }

    /// Remove the directory now and report failures.
    ///
    /// Dropping the workspace does the same silently.
    pub fn close(mut self) -> Result<()> {
        match self.dir.take() {
            Some(dir) => Ok(dir.close()?),
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(workspace = %self.root.display(), "failed to remove workspace: {e}");
            } else {
                debug!(workspace = %self.root.display(), "workspace removed");
            }
        }
    }
}

/// Remove `job-*` directories left under `work_root` by a previous run.
///
/// Returns how many were removed. Only called at startup, before any job exists.
pub fn sweep_stale(work_root: &Path) -> Result<usize> {
    let Ok(rd) = std::fs::read_dir(work_root) else {
        return Ok(0);
    };
    let mut removed = 0;
    for entry in rd.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("job-") || !entry.file_type()?.is_dir() {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(workspace = %entry.path().display(), "failed to remove stale workspace: {e}"),
        }
    }
    Ok(removed)
}

/// Keep `[A-Za-z0-9._-]`, replace everything else; never empty, never a dot path.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut out = String::with_capacity(base.len());
    for ch in base.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.chars().all(|c| c == '.') {
        "upload".to_string()
    } else {
        out
    }
}
