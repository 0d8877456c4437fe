//! Library environment management.
//!
//! [`LibraryManifest`] caches which packages the interpreter already has and
//! installs the missing ones in one batch. It is constructed once, passed to
//! the executor explicitly, and tolerates races: two executors installing the
//! same package is harmless. Install failures never abort an execution; a
//! script that really needs the package fails later with an import error.

mod pip;

pub use pip::PipBackend;

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::RwLock;
use std::time::Instant;

/// Failure while listing or installing packages.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    /// The package tool could not be started.
    #[error("failed to run package tool '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The package tool ran but reported failure.
    #[error("package tool exited with {status}: {stderr}")]
    Failed {
        /// Exit status description.
        status: String,
        /// Captured stderr.
        stderr: String,
    },
    /// The package tool did not finish in time.
    #[error("package tool timed out after {timeout_ms}ms")]
    TimedOut {
        /// Budget that ran out.
        timeout_ms: u64,
    },
    /// The package listing could not be parsed.
    #[error("unreadable package listing: {0}")]
    Listing(String),
    /// The manifest lock was poisoned by a panicking thread.
    #[error("library manifest lock poisoned")]
    Poisoned,
}

/// Source of truth for the interpreter's package set.
pub trait PackageBackend: Send + Sync + fmt::Debug {
    /// Names of installed packages, normalized with [`normalize_package_name`].
    fn installed(&self) -> Result<BTreeSet<String>, LibraryError>;
    /// Install all `requirements` in one command.
    fn install(&self, requirements: &[String]) -> Result<(), LibraryError>;
}

/// Cached view of installed packages.
#[derive(Clone, Debug)]
pub struct ManifestSnapshot {
    /// Normalized names of installed packages.
    pub installed: BTreeSet<String>,
    /// When the snapshot was taken.
    pub refreshed_at: Instant,
}

/// Outcome of one [`LibraryManifest::ensure_libraries`] call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LibraryReport {
    /// Requirements that were checked.
    pub required: Vec<String>,
    /// Requirements found missing.
    pub missing: Vec<String>,
    /// Requirements installed by this call.
    pub installed: Vec<String>,
    /// Error text if listing or installing failed.
    pub error: Option<String>,
}

impl LibraryReport {
    /// True when nothing is missing afterwards, as far as this call knows.
    pub fn satisfied(&self) -> bool {
        self.error.is_none() && self.missing.len() == self.installed.len()
    }
}

/// Process-wide cache of the interpreter's package set.
#[derive(Debug)]
pub struct LibraryManifest {
    backend: Box<dyn PackageBackend>,
    cache: RwLock<Option<ManifestSnapshot>>,
}

impl LibraryManifest {
    /// Create a manifest over `backend`. Nothing is queried until first use.
    pub fn new(backend: impl PackageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            cache: RwLock::new(None),
        }
    }

    /// Current snapshot, if one has been taken.
    pub fn snapshot(&self) -> Option<ManifestSnapshot> {
        self.cache.read().ok().and_then(|guard| guard.clone())
    }

    /// Drop the cached snapshot so the next call re-queries the backend.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.cache.write() {
            *guard = None;
        }
    }

    /// Re-query the backend and replace the cached snapshot.
    pub fn refresh(&self) -> Result<ManifestSnapshot, LibraryError> {
        let installed = self.backend.installed()?;
        let snapshot = ManifestSnapshot {
            installed,
            refreshed_at: Instant::now(),
        };
        let mut guard = self.cache.write().map_err(|_| LibraryError::Poisoned)?;
        *guard = Some(snapshot.clone());
        tracing::debug!(packages = snapshot.installed.len(), "library manifest refreshed");
        Ok(snapshot)
    }

    /// Requirements from `required` that the interpreter lacks.
    pub fn missing(&self, required: &[String]) -> Result<Vec<String>, LibraryError> {
        let snapshot = match self.snapshot() {
            Some(snapshot) => snapshot,
            None => self.refresh()?,
        };
        let mut seen = BTreeSet::new();
        Ok(required
            .iter()
            .filter(|req| {
                let name = normalize_package_name(req);
                !name.is_empty() && !snapshot.installed.contains(&name) && seen.insert(name)
            })
            .cloned()
            .collect())
    }

    /// Install whatever in `required` is missing, in one batch.
    ///
    /// Never fails: problems are logged and recorded in the report.
    pub fn ensure_libraries(&self, required: &[String]) -> LibraryReport {
        let mut report = LibraryReport {
            required: required.to_vec(),
            ..LibraryReport::default()
        };
        let missing = match self.missing(required) {
            Ok(missing) => missing,
            Err(err) => {
                tracing::warn!(error = %err, "could not determine installed packages");
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.missing = missing.clone();
        if missing.is_empty() {
            return report;
        }

        tracing::info!(missing = ?missing, "installing missing packages");
        match self.backend.install(&missing) {
            Ok(()) => {
                report.installed = missing;
                if let Err(err) = self.refresh() {
                    tracing::warn!(error = %err, "library manifest refresh failed after install");
                    self.invalidate();
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, missing = ?missing, "package install failed; continuing");
                report.error = Some(err.to_string());
                self.invalidate();
            }
        }
        report
    }
}

/// PEP 503 name normalization with any version specifier or extras removed.
///
/// `"Pandas>=2.0"` and `"pandas"` both normalize to `"pandas"`;
/// `"scikit_learn[alldeps]"` normalizes to `"scikit-learn"`.
pub fn normalize_package_name(requirement: &str) -> String {
    let requirement = requirement.trim();
    let name_end = requirement
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
        .unwrap_or(requirement.len());
    let name = requirement.get(..name_end).unwrap_or(requirement);
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for ch in name.chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !last_dash {
                out.push('-');
            }
            last_dash = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        }
    }
    out
}

/// True if `stderr` looks like the interpreter failed on a missing module.
pub fn is_import_failure(stderr: &str) -> bool {
    stderr.contains("ModuleNotFoundError") || stderr.contains("ImportError")
}
