//! The execution orchestrator.
//!
//! [`Executor::execute_screener`] runs the whole pipeline for one definition:
//! assemble, write the artifact, ensure libraries, run the interpreter,
//! extract the payload, delete the artifact. Every expected failure becomes a
//! failed [`ExecutionResult`]; only I/O faults around the artifact surface as
//! [`RunnerError`].

mod error;

pub use error::*;

use crate::artifact::ExecutionArtifact;
use crate::assembler::{AssembledProgram, AssemblyError, ProgramAssembler, PythonAssembler};
use crate::config::validate_config;
use crate::extract::{extract_with, parse_failure};
use crate::library::{is_import_failure, LibraryManifest, LibraryReport, PipBackend};
use crate::model::{
    truncate_chars, Diagnostics, ErrorInfo, ExecutionId, ExecutionResult, ExecutorConfig,
    LibraryStrategy, ScreenerDefinition,
};
use crate::process::{ProcessDriver, ProcessError, ProcessExit, ProcessOutput};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// Runs screener definitions. Cheap to share across threads.
#[derive(Debug)]
pub struct Executor {
    config: ExecutorConfig,
    assembler: Box<dyn ProgramAssembler>,
    libraries: Arc<LibraryManifest>,
    driver: ProcessDriver,
}

impl Executor {
    /// Production executor: Python assembler and a pip-backed manifest.
    pub fn new(config: ExecutorConfig) -> RunnerResult<Self> {
        let assembler = PythonAssembler::new(config.data.clone());
        let libraries = Arc::new(LibraryManifest::new(PipBackend::from_config(&config)));
        Self::with_parts(config, Box::new(assembler), libraries)
    }

    /// Executor over explicit parts, e.g. a shared manifest or another dialect.
    pub fn with_parts(
        config: ExecutorConfig,
        assembler: Box<dyn ProgramAssembler>,
        libraries: Arc<LibraryManifest>,
    ) -> RunnerResult<Self> {
        validate_config(&config)?;
        let driver = ProcessDriver::from_config(&config);
        Ok(Self {
            config,
            assembler,
            libraries,
            driver,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Shared library manifest.
    pub fn libraries(&self) -> &Arc<LibraryManifest> {
        &self.libraries
    }

    /// Assemble without running.
    pub fn assemble(&self, definition: &ScreenerDefinition) -> Result<AssembledProgram, AssemblyError> {
        self.assembler.assemble(definition)
    }

    /// Ensure the configured packages, regardless of strategy.
    pub fn ensure_libraries(&self) -> LibraryReport {
        self.libraries.ensure_libraries(&self.config.libraries.required)
    }

    /// Execute one definition end to end.
    ///
    /// Each call gets a fresh [`ExecutionId`], artifact and process, so
    /// concurrent calls never interfere.
    pub fn execute_screener(&self, definition: &ScreenerDefinition) -> RunnerResult<ExecutionResult> {
        let execution_id = ExecutionId::new();
        let span = tracing::info_span!(
            "execute_screener",
            execution_id = %execution_id,
            screener_id = %definition.id
        );
        let _entered = span.enter();
        let started = Instant::now();

        let mut result = self.run_pipeline(execution_id, definition)?;
        result.execution_time_seconds = started.elapsed().as_secs_f64();
        result.timestamp = Utc::now();
        tracing::info!(
            success = result.success,
            matches = result.matches.len(),
            code = result.error_code().unwrap_or("-"),
            strategy = result.strategy.as_deref().unwrap_or("-"),
            seconds = result.execution_time_seconds,
            "screener execution finished"
        );
        Ok(result)
    }

    fn run_pipeline(
        &self,
        execution_id: ExecutionId,
        definition: &ScreenerDefinition,
    ) -> RunnerResult<ExecutionResult> {
        let program = match self.assembler.assemble(definition) {
            Ok(program) => program,
            Err(err) => {
                tracing::warn!(error = %err, "assembly failed");
                let info = RunnerError::from(err).to_error_info();
                return Ok(ExecutionResult::failure(execution_id, info));
            }
        };

        let artifact = ExecutionArtifact::create(
            &self.config.resolved_artifact_dir(),
            &execution_id,
            &definition.id,
            &program.source,
            program.extension,
        )?;

        let strategy = self.config.libraries.strategy;
        if strategy == LibraryStrategy::Eager {
            self.ensure_libraries();
        }

        let run = self.driver.run(artifact.path());
        if let Err(err) = artifact.remove() {
            tracing::warn!(error = %err, "failed to remove execution artifact");
        }

        let output = match run {
            Ok(output) => output,
            Err(ProcessError::Spawn { program, source }) => {
                tracing::warn!(interpreter = %program, error = %source, "interpreter failed to spawn");
                let info = ErrorInfo {
                    code: ErrorCode::ProcessSpawn.as_str().to_string(),
                    message: format!("failed to start interpreter '{program}': {source}"),
                    context: Some(serde_json::json!({
                        "interpreter": program,
                        "kind": format!("{:?}", source.kind()),
                    })),
                };
                return Ok(ExecutionResult::failure(execution_id, info));
            }
            Err(err @ ProcessError::Wait { .. }) => {
                return Err(RunnerError::io("lost track of interpreter process", err));
            }
        };
        tracing::debug!(exit = ?output.exit, pid = output.pid, "interpreter finished");

        if strategy == LibraryStrategy::AfterImportFailure
            && !output.exit.success()
            && is_import_failure(&output.stderr)
        {
            // the failed run is not retried; later executions see the packages
            let report = self.ensure_libraries();
            tracing::info!(installed = ?report.installed, "packages ensured after import failure");
        }

        Ok(self.interpret(execution_id, output))
    }

    /// Turn captured output into a result.
    fn interpret(&self, execution_id: ExecutionId, output: ProcessOutput) -> ExecutionResult {
        let exit = output.exit.to_record();
        let mut result = match output.exit {
            ProcessExit::TimedOut => self.budget_failure(
                execution_id,
                ErrorCode::Timeout,
                format!(
                    "screener exceeded the runtime budget of {}ms",
                    self.config.budgets.max_runtime_ms
                ),
                &output,
            ),
            ProcessExit::OutputLimitExceeded => self.budget_failure(
                execution_id,
                ErrorCode::OutputLimit,
                format!(
                    "screener exceeded the output budget of {} bytes",
                    self.config.budgets.max_output_bytes
                ),
                &output,
            ),
            ProcessExit::Code(_) | ProcessExit::Signal(_) => self.extract_payload(execution_id, output),
        };
        result.exit = Some(exit);
        result
    }

    fn extract_payload(&self, execution_id: ExecutionId, output: ProcessOutput) -> ExecutionResult {
        let clean_exit = output.exit.success();
        match extract_with(&output.stdout, self.config.diagnostics.excerpt_chars) {
            Ok(extracted) if clean_exit || extracted.payload.is_failure() => {
                let mut result = extracted.payload.into_result(execution_id, extracted.strategy);
                if !result.success {
                    let traceback = result.diagnostics.take().and_then(|diag| diag.traceback);
                    result.diagnostics = Some(Diagnostics {
                        stdout: output.stdout,
                        stderr: output.stderr,
                        traceback,
                        ..Diagnostics::default()
                    });
                }
                result
            }
            Err(err) if clean_exit => {
                tracing::warn!(attempts = %err.attempts_summary(), "no result payload in output");
                parse_failure(execution_id, &err, output.stderr)
            }
            _ => self.exit_failure(execution_id, output),
        }
    }

    /// Non-zero exit without a failure-shaped payload.
    fn exit_failure(&self, execution_id: ExecutionId, output: ProcessOutput) -> ExecutionResult {
        let status = match output.exit {
            ProcessExit::Signal(signal) => format!("signal {signal}"),
            ProcessExit::Code(code) => format!("code {code}"),
            ProcessExit::TimedOut | ProcessExit::OutputLimitExceeded => "a harness stop".to_string(),
        };
        let stderr = output.stderr.trim();
        let message = if stderr.is_empty() {
            format!("interpreter exited with {status}")
        } else {
            format!(
                "interpreter exited with {status}: {}",
                truncate_chars(stderr, self.config.diagnostics.user_message_chars)
            )
        };
        tracing::warn!(status = %status, "interpreter exited without a usable payload");
        let info = ErrorInfo {
            code: ErrorCode::ProcessExit.as_str().to_string(),
            message,
            context: Some(serde_json::to_value(output.exit.to_record()).unwrap_or_default()),
        };
        let mut result = ExecutionResult::failure(execution_id, info);
        result.diagnostics = Some(self.raw_diagnostics(&output));
        result
    }

    fn budget_failure(
        &self,
        execution_id: ExecutionId,
        code: ErrorCode,
        message: String,
        output: &ProcessOutput,
    ) -> ExecutionResult {
        tracing::warn!(code = %code, "{message}");
        let info = ErrorInfo {
            code: code.as_str().to_string(),
            message,
            context: Some(serde_json::json!({
                "max_runtime_ms": self.config.budgets.max_runtime_ms,
                "max_output_bytes": self.config.budgets.max_output_bytes,
            })),
        };
        let mut result = ExecutionResult::failure(execution_id, info);
        result.diagnostics = Some(self.raw_diagnostics(output));
        result
    }

    fn raw_diagnostics(&self, output: &ProcessOutput) -> Diagnostics {
        Diagnostics {
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            traceback: None,
            length_summary: Some(crate::extract::length_summary(&output.stdout)),
            excerpt: Some(crate::extract::escaped_excerpt(
                &output.stdout,
                self.config.diagnostics.excerpt_chars,
            )),
        }
    }
}
