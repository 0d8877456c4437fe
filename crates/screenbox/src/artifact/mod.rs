//! Execution artifacts: the assembled program written to disk for one run.
//!
//! Each execution gets its own uniquely named file. The file is removed when
//! the [`ExecutionArtifact`] is dropped, so every exit path of the executor
//! cleans up, including early returns and panics.

use crate::model::ExecutionId;
use crate::runner::{RunnerError, RunnerResult};
use std::fs::OpenOptions;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Longest screener-id fragment kept in an artifact file name.
const MAX_ID_FRAGMENT: usize = 40;

/// A program file on disk, removed on drop.
#[derive(Debug)]
pub struct ExecutionArtifact {
    path: Option<PathBuf>,
}

impl ExecutionArtifact {
    /// Write `source` to a fresh file in `dir`.
    ///
    /// The file is created exclusively (an existing file is never reused) and,
    /// on unix, readable only by the owner.
    pub fn create(
        dir: &Path,
        execution_id: &ExecutionId,
        screener_id: &str,
        source: &str,
        extension: &str,
    ) -> RunnerResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|err| RunnerError::io("failed to create artifact directory", err))?;
        let path = dir.join(artifact_file_name(execution_id, screener_id, extension));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&path)
            .map_err(|err| RunnerError::io("failed to create execution artifact", err))?;
        // from here on the guard owns the file
        let artifact = Self { path: Some(path) };
        file.write_all(source.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| RunnerError::io("failed to write execution artifact", err))?;
        tracing::debug!(path = %artifact.path().display(), bytes = source.len(), "artifact written");
        Ok(artifact)
    }

    /// Location of the artifact.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Remove the artifact now, reporting any failure.
    pub fn remove(mut self) -> std::io::Result<()> {
        match self.path.take() {
            Some(path) => std::fs::remove_file(path),
            None => Ok(()),
        }
    }

    /// Stop managing the file and leave it on disk.
    pub fn keep(mut self) -> Option<PathBuf> {
        self.path.take()
    }
}

impl Drop for ExecutionArtifact {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove execution artifact");
            }
        }
    }
}

/// `screener-<id>-<execution>.<ext>`, with the screener id reduced to a
/// filesystem-safe fragment.
pub fn artifact_file_name(execution_id: &ExecutionId, screener_id: &str, extension: &str) -> String {
    let fragment: String = screener_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_ID_FRAGMENT)
        .collect();
    let fragment = if fragment.is_empty() {
        "anonymous".to_string()
    } else {
        fragment
    };
    format!("screener-{fragment}-{}.{extension}", execution_id.simple())
}
