//! Executor configuration, loadable from JSON or YAML.

use crate::model::DataProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Symbols screened when a definition does not name its own universe.
pub const DEFAULT_UNIVERSE: &[&str] = &[
    "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL", "META", "TSLA", "BRK.B", "JPM", "V", "UNH", "XOM",
    "JNJ", "WMT", "MA", "PG", "AVGO", "HD", "CVX", "MRK", "ABBV", "COST", "PEP", "KO", "ADBE",
    "CRM", "NFLX", "AMD", "INTC", "DIS",
];

/// Executor configuration.
///
/// Every field has a default, so an empty JSON object or YAML document is a
/// valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Interpreter binary. Resolved through `PATH` when not absolute.
    pub interpreter: String,
    /// Arguments placed before the artifact path.
    pub interpreter_args: Vec<String>,
    /// Working directory of the child process; inherited when absent.
    pub working_dir: Option<PathBuf>,
    /// Directory holding execution artifacts; `<tmp>/screenbox` when absent.
    pub artifact_dir: Option<PathBuf>,
    /// Resource budgets.
    pub budgets: Budgets,
    /// Child environment.
    pub env: EnvPolicy,
    /// Third-party package handling.
    pub libraries: LibraryPolicy,
    /// Settings baked into the generated data-loading helpers.
    pub data: DataLoading,
    /// Failure-report shaping.
    pub diagnostics: DiagnosticsPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-u".to_string()],
            working_dir: None,
            artifact_dir: None,
            budgets: Budgets::default(),
            env: EnvPolicy::default(),
            libraries: LibraryPolicy::default(),
            data: DataLoading::default(),
            diagnostics: DiagnosticsPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    /// Directory where artifacts are written.
    pub fn resolved_artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("screenbox"))
    }
}

/// Resource budgets for one execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Budgets {
    /// Wall-clock cap for the interpreter process in milliseconds.
    pub max_runtime_ms: u64,
    /// Cap on combined stdout + stderr bytes retained from the process.
    pub max_output_bytes: u64,
    /// Time between SIGTERM and SIGKILL when the harness stops a process.
    pub kill_grace_ms: u64,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_runtime_ms: 300_000,
            max_output_bytes: 16 * 1024 * 1024,
            kill_grace_ms: 2_000,
        }
    }
}

/// Environment handed to the interpreter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvPolicy {
    /// Pass the ambient environment through (credentials live there).
    pub inherit: bool,
    /// Explicit variables to set.
    pub set: BTreeMap<String, String>,
    /// Variables removed from the inherited environment.
    pub remove: Vec<String>,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        Self {
            inherit: true,
            set: BTreeMap::new(),
            remove: Vec::new(),
        }
    }
}

/// When the library manager runs.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LibraryStrategy {
    /// Ensure required packages before every execution.
    #[default]
    Eager,
    /// Ensure packages only after an execution fails on a missing import, so
    /// later executions find them.
    AfterImportFailure,
    /// Never touch the package set.
    Skip,
}

/// Third-party package policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryPolicy {
    /// When to ensure packages.
    pub strategy: LibraryStrategy,
    /// Packages generated programs need (pip requirement strings).
    pub required: Vec<String>,
    /// Cap on a single install or listing command.
    pub install_timeout_ms: u64,
}

impl Default for LibraryPolicy {
    fn default() -> Self {
        Self {
            strategy: LibraryStrategy::Eager,
            required: vec!["pandas".to_string(), "numpy".to_string()],
            install_timeout_ms: 600_000,
        }
    }
}

/// Settings for the generated data-loading helpers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLoading {
    /// Provider used when a definition names none.
    pub default_provider: DataProvider,
    /// Module exposing `get_provider(tag, **credentials)`.
    pub provider_module: String,
    /// Symbols per provider request.
    pub batch_size: u32,
    /// Pause between provider requests in milliseconds.
    pub batch_delay_ms: u64,
    /// Daily bars requested per symbol.
    pub lookback_days: u32,
    /// Symbols used when a definition names no universe.
    pub default_universe: Vec<String>,
}

impl Default for DataLoading {
    fn default() -> Self {
        Self {
            default_provider: DataProvider::Alpaca,
            provider_module: "data_providers".to_string(),
            batch_size: 50,
            batch_delay_ms: 500,
            lookback_days: 120,
            default_universe: DEFAULT_UNIVERSE.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Shaping of failure reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsPolicy {
    /// Characters of stdout included, escaped, in parse-failure reports.
    pub excerpt_chars: usize,
    /// Bound on the end-user message built from a failure.
    pub user_message_chars: usize,
}

impl Default for DiagnosticsPolicy {
    fn default() -> Self {
        Self {
            excerpt_chars: 500,
            user_message_chars: 2_000,
        }
    }
}
