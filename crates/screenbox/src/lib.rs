//! Screenbox: runs user-authored stock screeners out of process.
//!
//! A screener is a small script fragment defining `screen_stocks(data)`. This
//! crate wraps it in a complete program (imports, data-loading and indicator
//! helpers, a result-printing harness), runs that program in a fresh
//! interpreter process under time and output budgets, and recovers a typed
//! [`ExecutionResult`] from the process output even when it is noisy.

#![forbid(unsafe_code)]

pub mod artifact;
pub mod assembler;
pub mod config;
pub mod extract;
pub mod library;
pub mod model;
pub mod process;
pub mod runner;

pub use crate::model::*;

pub mod run {
    //! One-call entry points using a default [`Executor`](crate::runner::Executor).

    use super::runner::{Executor, RunnerResult};
    use super::{ExecutionResult, ExecutorConfig, ScreenerDefinition};

    /// Execute `definition` with the default configuration.
    pub fn execute_screener(definition: &ScreenerDefinition) -> RunnerResult<ExecutionResult> {
        execute_screener_with_config(definition, ExecutorConfig::default())
    }

    /// Execute `definition` with `config`.
    pub fn execute_screener_with_config(
        definition: &ScreenerDefinition,
        config: ExecutorConfig,
    ) -> RunnerResult<ExecutionResult> {
        Executor::new(config)?.execute_screener(definition)
    }
}
