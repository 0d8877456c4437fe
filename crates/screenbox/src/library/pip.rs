use super::{normalize_package_name, LibraryError, PackageBackend};
use crate::model::{Budgets, ExecutorConfig};
use crate::process::{ProcessDriver, ProcessError, ProcessExit, ProcessOutput};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Characters of pip stderr kept in error messages.
const STDERR_KEEP: usize = 2000;

#[derive(Debug, Deserialize)]
struct PipEntry {
    name: String,
}

/// [`PackageBackend`] that shells out to `<interpreter> -m pip`.
#[derive(Clone, Debug)]
pub struct PipBackend {
    driver: ProcessDriver,
    timeout_ms: u64,
}

impl PipBackend {
    /// Backend for the interpreter and install budget in `config`.
    pub fn from_config(config: &ExecutorConfig) -> Self {
        let timeout_ms = config.libraries.install_timeout_ms;
        let budgets = Budgets {
            max_runtime_ms: timeout_ms,
            ..config.budgets.clone()
        };
        Self {
            driver: ProcessDriver::from_config(config).with_budgets(budgets),
            timeout_ms,
        }
    }

    fn pip(&self, args: &[&str]) -> Result<ProcessOutput, LibraryError> {
        let mut full = vec!["-m".to_string(), "pip".to_string()];
        full.extend(args.iter().map(ToString::to_string));
        full.push("--disable-pip-version-check".to_string());
        let output = self.driver.run_with_args(&full).map_err(|err| match err {
            ProcessError::Spawn { program, source } => LibraryError::Spawn { program, source },
            ProcessError::Wait { source, .. } => LibraryError::Spawn {
                program: self.driver.interpreter().to_string(),
                source,
            },
        })?;
        match output.exit {
            ProcessExit::Code(0) => Ok(output),
            ProcessExit::TimedOut => Err(LibraryError::TimedOut {
                timeout_ms: self.timeout_ms,
            }),
            ProcessExit::Code(code) => Err(failed(format!("code {code}"), &output.stderr)),
            ProcessExit::Signal(signal) => Err(failed(format!("signal {signal}"), &output.stderr)),
            ProcessExit::OutputLimitExceeded => {
                Err(failed("output limit".to_string(), &output.stderr))
            }
        }
    }
}

fn failed(status: String, stderr: &str) -> LibraryError {
    LibraryError::Failed {
        status,
        stderr: crate::model::truncate_chars(stderr.trim(), STDERR_KEEP),
    }
}

impl PackageBackend for PipBackend {
    fn installed(&self) -> Result<BTreeSet<String>, LibraryError> {
        let output = self.pip(&["list", "--format=json"])?;
        // pip may print notices before the listing
        let listing = output
            .stdout
            .lines()
            .find(|line| line.trim_start().starts_with('['))
            .ok_or_else(|| LibraryError::Listing("no JSON array in pip output".to_string()))?;
        let entries: Vec<PipEntry> =
            serde_json::from_str(listing).map_err(|err| LibraryError::Listing(err.to_string()))?;
        Ok(entries
            .iter()
            .map(|entry| normalize_package_name(&entry.name))
            .collect())
    }

    fn install(&self, requirements: &[String]) -> Result<(), LibraryError> {
        if requirements.is_empty() {
            return Ok(());
        }
        let mut args = vec!["install", "--quiet"];
        args.extend(requirements.iter().map(String::as_str));
        self.pip(&args).map(|_| ())
    }
}
