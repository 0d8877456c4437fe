//! Screenbox CLI: assemble, run and inspect stock screeners.
//!
//! Machine-readable output goes to stdout, logs and diagnostics to stderr.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

use clap::{ArgAction, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use screenbox::config::{load_config_file, load_definition_file};
use screenbox::extract::extract_result;
use screenbox::library::{LibraryManifest, LibraryReport, PipBackend};
use screenbox::runner::{ErrorCode, Executor, RunnerError};
use screenbox::{ExecutionId, ExecutionResult, ExecutorConfig, LibraryStrategy, ScreenerDefinition};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod progress;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(name = "screenbox", version, about = "Run stock screeners out of process")]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Increase log verbosity (`RUST_LOG` overrides)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
struct ExecOverrides {
    #[arg(long, help = "Executor config file (JSON or YAML)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Interpreter binary to run programs with")]
    interpreter: Option<String>,
    #[arg(long, help = "Runtime budget in milliseconds")]
    timeout_ms: Option<u64>,
    #[arg(long, help = "Do not check or install packages")]
    skip_libraries: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute one screener definition
    Run {
        #[arg(long)]
        definition: PathBuf,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        overrides: ExecOverrides,
    },
    /// Execute several definitions concurrently, printing one JSON result per line
    Batch {
        #[arg(long, required = true, num_args = 1..)]
        definition: Vec<PathBuf>,
        #[arg(long, default_value_t = 4, help = "Maximum concurrent executions")]
        jobs: usize,
        #[command(flatten)]
        overrides: ExecOverrides,
    },
    /// Print the program assembled for a definition
    Assemble {
        #[arg(long)]
        definition: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the extraction pipeline over captured stdout
    Extract {
        #[arg(long, help = "Captured stdout file (default: stdin)")]
        input: Option<PathBuf>,
    },
    /// Report or install the packages generated programs need
    Libraries {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, help = "Only report missing packages")]
        check: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            std::env::var("NO_COLOR").is_err()
                && supports_color::on(supports_color::Stream::Stderr).is_some()
        }
    };
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

fn init_tracing(verbose: u8) {
    let default = if verbose == 0 { "warn" } else { "debug" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_colors(cli.color);
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Run {
            definition,
            json,
            overrides,
        } => cmd_run(&definition, json, &overrides),
        Commands::Batch {
            definition,
            jobs,
            overrides,
        } => cmd_batch(definition, jobs, &overrides),
        Commands::Assemble { definition, config } => cmd_assemble(&definition, config.as_deref()),
        Commands::Extract { input } => cmd_extract(input.as_deref()),
        Commands::Libraries { config, check } => cmd_libraries(config.as_deref(), check),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

fn cmd_run(definition_path: &Path, json: bool, overrides: &ExecOverrides) -> Result<()> {
    let prepared = build_executor(overrides).and_then(|executor| {
        load_definition_file(definition_path).map(|definition| (executor, definition))
    });
    let (executor, definition) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return emit_error(json, &err),
    };
    let spinner = progress::Spinner::start(!json, format!("running {}", definition.id));
    let result = executor.execute_screener(&definition);
    spinner.finish();
    match result {
        Ok(result) => emit_result(json, &result, executor.config().diagnostics.user_message_chars),
        Err(err) => emit_error(json, &err),
    }
}

fn cmd_batch(paths: Vec<PathBuf>, jobs: usize, overrides: &ExecOverrides) -> Result<()> {
    let prepared = build_executor(overrides).and_then(|executor| {
        paths
            .iter()
            .map(|path| load_definition_file(path))
            .collect::<Result<Vec<ScreenerDefinition>, RunnerError>>()
            .map(|definitions| (executor, definitions))
    });
    let (executor, definitions) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return emit_error(true, &err),
    };

    tracing::debug!(count = definitions.len(), jobs, "starting batch");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let outcomes = runtime.block_on(run_batch(Arc::new(executor), definitions, jobs.max(1)));

    let mut first_failure = None;
    for outcome in outcomes {
        let line = match &outcome {
            Ok(result) => serde_json::to_string(result).into_diagnostic()?,
            Err(err) => serde_json::to_string(&err.to_error_info()).into_diagnostic()?,
        };
        println!("{line}");
        let code = match &outcome {
            Ok(result) => result.error_code().map(exit_code_for_error_code),
            Err(err) => Some(err.exit_code()),
        };
        if first_failure.is_none() {
            first_failure = code;
        }
    }
    if let Some(code) = first_failure {
        std::process::exit(code);
    }
    Ok(())
}

/// Results come back in input order regardless of completion order.
async fn run_batch(
    executor: Arc<Executor>,
    definitions: Vec<ScreenerDefinition>,
    jobs: usize,
) -> Vec<Result<ExecutionResult, RunnerError>> {
    let permits = Arc::new(tokio::sync::Semaphore::new(jobs));
    let mut handles = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let executor = Arc::clone(&executor);
        let permits = Arc::clone(&permits);
        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            tokio::task::spawn_blocking(move || executor.execute_screener(&definition)).await
        }));
    }
    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) | Err(join) => Err(RunnerError::new(
                ErrorCode::Io,
                "batch worker failed",
                serde_json::json!({ "source": join.to_string() }),
            )),
        };
        outcomes.push(outcome);
    }
    outcomes
}

fn cmd_assemble(definition_path: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let executor = Executor::new(config)?;
    let definition = load_definition_file(definition_path)?;
    let program = executor.assemble(&definition).map_err(RunnerError::from)?;
    print!("{}", program.source);
    Ok(())
}

fn cmd_extract(input: Option<&Path>) -> Result<()> {
    let stdout = match input {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|err| RunnerError::io(format!("failed to read {}", path.display()), err))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|err| RunnerError::io("failed to read stdin", err))?;
            buffer
        }
    };
    let defaults = ExecutorConfig::default().diagnostics;
    let result = extract_result(&stdout, ExecutionId::new(), defaults.excerpt_chars);
    emit_result(true, &result, defaults.user_message_chars)
}

fn cmd_libraries(config: Option<&Path>, check: bool) -> Result<()> {
    let config = load_config(config)?;
    let manifest = LibraryManifest::new(PipBackend::from_config(&config));
    let required = &config.libraries.required;
    let report = if check {
        match manifest.missing(required) {
            Ok(missing) => LibraryReport {
                required: required.clone(),
                missing,
                ..LibraryReport::default()
            },
            Err(err) => LibraryReport {
                required: required.clone(),
                error: Some(err.to_string()),
                ..LibraryReport::default()
            },
        }
    } else {
        manifest.ensure_libraries(required)
    };
    println!("{}", serde_json::to_string(&report).into_diagnostic()?);
    if !report.satisfied() {
        std::process::exit(ErrorCode::LibraryInstall.exit_code());
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "screenbox", &mut io::stdout());
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn load_config(path: Option<&Path>) -> Result<ExecutorConfig, RunnerError> {
    match path {
        Some(path) => load_config_file(path),
        None => Ok(ExecutorConfig::default()),
    }
}

fn build_executor(overrides: &ExecOverrides) -> Result<Executor, RunnerError> {
    let mut config = load_config(overrides.config.as_deref())?;
    if let Some(interpreter) = &overrides.interpreter {
        config.interpreter.clone_from(interpreter);
    }
    if let Some(timeout_ms) = overrides.timeout_ms {
        config.budgets.max_runtime_ms = timeout_ms;
    }
    if overrides.skip_libraries {
        config.libraries.strategy = LibraryStrategy::Skip;
    }
    Executor::new(config)
}

fn emit_result(json: bool, result: &ExecutionResult, message_chars: usize) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(result).into_diagnostic()?);
    } else if result.success {
        println!(
            "{} match(es) in {:.2}s",
            result.matches.len(),
            result.execution_time_seconds
        );
        for symbol in &result.matches {
            println!("  {symbol}");
        }
    } else if let Some(message) = result.user_message(message_chars) {
        eprintln!("error: {message}");
    }
    match result.error_code() {
        Some(code) if !result.success => std::process::exit(exit_code_for_error_code(code)),
        _ if !result.success => std::process::exit(1),
        _ => Ok(()),
    }
}

fn emit_error(json: bool, err: &RunnerError) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("error: {err}");
    }
    std::process::exit(err.exit_code());
}

fn exit_code_for_error_code(code: &str) -> i32 {
    ErrorCode::parse(code).map_or(1, ErrorCode::exit_code)
}
