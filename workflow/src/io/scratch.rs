//! Session-scoped working directory.
//!
//! Acquired when a session starts and released exactly once when the value
//! is dropped or closed, whichever comes first.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    /// Present while a temporary directory is still owned by us.
    temp: Option<TempDir>,
    keep: bool,
}

impl ScratchDir {
    /// Use `provided` when given (created if missing, never deleted), else a
    /// fresh temporary directory that is deleted on release unless `keep`.
    pub fn acquire(provided: Option<&Path>, keep: bool) -> Result<Self> {
        if let Some(dir) = provided {
            fs::create_dir_all(dir)
                .with_context(|| format!("create working directory {}", dir.display()))?;
            debug!(path = %dir.display(), "using provided working directory");
            return Ok(Self {
                path: dir.to_path_buf(),
                temp: None,
                keep: true,
            });
        }

        let temp = tempfile::Builder::new()
            .prefix("workflow-")
            .tempdir()
            .context("create temporary working directory")?;
        debug!(path = %temp.path().display(), keep, "created temporary working directory");
        Ok(Self {
            path: temp.path().to_path_buf(),
            temp: Some(temp),
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory outlives the session.
    pub fn is_kept(&self) -> bool {
        self.temp.is_none() || self.keep
    }

    /// Release now and report deletion errors instead of logging them.
    pub fn close(mut self) -> Result<()> {
        match self.temp.take() {
            Some(temp) if self.keep => {
                let path = temp.keep();
                info!(path = %path.display(), "kept working directory");
                Ok(())
            }
            Some(temp) => temp
                .close()
                .with_context(|| format!("remove working directory {}", self.path.display())),
            None => Ok(()),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match self.temp.take() {
            Some(temp) if self.keep => {
                let path = temp.keep();
                info!(path = %path.display(), "kept working directory");
            }
            Some(temp) => {
                if let Err(err) = temp.close() {
                    warn!(err = %err, path = %self.path.display(), "failed to remove working directory");
                }
            }
            None => {}
        }
    }
}
