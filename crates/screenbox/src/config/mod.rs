//! Loading and validating executor configuration and screener definitions.

use crate::assembler::literal::is_python_module_path;
use crate::model::{EnvPolicy, ExecutorConfig, ScreenerDefinition};
use crate::runner::{ErrorCode, RunnerError, RunnerResult};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::process::Command;

/// Variables that let a child load foreign code before the interpreter runs.
/// Matched case-insensitively; `DYLD_` is matched as a prefix.
const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "PYTHONSTARTUP",
    "PYTHONINSPECT",
    "IFS",
    "GMON_OUT_PREFIX",
    "MALLOC_CONF",
];

fn is_dangerous_env_var(key: &str) -> bool {
    key.get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("DYLD_"))
        || DANGEROUS_ENV_VARS.iter().any(|var| var.eq_ignore_ascii_case(key))
}

/// Load an [`ExecutorConfig`] from JSON, or YAML for `.yaml`/`.yml` paths.
pub fn load_config_file(path: &Path) -> RunnerResult<ExecutorConfig> {
    load_file(path, "config")
}

/// Load a [`ScreenerDefinition`] from JSON, or YAML for `.yaml`/`.yml` paths.
pub fn load_definition_file(path: &Path) -> RunnerResult<ScreenerDefinition> {
    load_file(path, "screener definition")
}

fn load_file<T: DeserializeOwned>(path: &Path, what: &str) -> RunnerResult<T> {
    let data = std::fs::read_to_string(path)
        .map_err(|err| RunnerError::io(format!("failed to read {what} file {}", path.display()), err))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
    let context = serde_json::json!({ "path": path.display().to_string() });
    if is_yaml {
        serde_yml::from_str(&data).map_err(|err| {
            RunnerError::protocol(format!("failed to parse {what} yaml: {err}"), context)
        })
    } else {
        serde_json::from_str(&data).map_err(|err| {
            RunnerError::protocol(format!("failed to parse {what} json: {err}"), context)
        })
    }
}

/// Reject configurations the executor cannot run safely.
pub fn validate_config(config: &ExecutorConfig) -> RunnerResult<()> {
    if config.interpreter.trim().is_empty() {
        return Err(RunnerError::config("interpreter must not be empty", None));
    }
    let budgets = &config.budgets;
    for (field, value) in [
        ("budgets.max_runtime_ms", budgets.max_runtime_ms),
        ("budgets.max_output_bytes", budgets.max_output_bytes),
        ("libraries.install_timeout_ms", config.libraries.install_timeout_ms),
        ("data.batch_size", u64::from(config.data.batch_size)),
        ("data.lookback_days", u64::from(config.data.lookback_days)),
    ] {
        if value == 0 {
            return Err(RunnerError::config(
                format!("{field} must be greater than zero"),
                serde_json::json!({ "field": field }),
            ));
        }
    }
    if !is_python_module_path(&config.data.provider_module) {
        return Err(RunnerError::config(
            "data.provider_module must be a dotted module path",
            serde_json::json!({ "provider_module": config.data.provider_module }),
        ));
    }
    validate_env_policy(&config.env)
}

/// Reject explicitly set loader-injection variables.
pub fn validate_env_policy(env: &EnvPolicy) -> RunnerResult<()> {
    if let Some(key) = env.set.keys().find(|key| is_dangerous_env_var(key)) {
        return Err(RunnerError::new(
            ErrorCode::Config,
            "dangerous environment variable blocked",
            serde_json::json!({
                "var": key,
                "blocked_vars": DANGEROUS_ENV_VARS,
                "fix": format!("Remove '{key}' from env.set"),
            }),
        ));
    }
    Ok(())
}

/// Build the child environment from `env`.
pub fn apply_env_policy(env: &EnvPolicy, cmd: &mut Command) {
    if !env.inherit {
        cmd.env_clear();
    }
    for key in &env.remove {
        cmd.env_remove(key);
    }
    for (key, value) in &env.set {
        cmd.env(key, value);
    }
}
