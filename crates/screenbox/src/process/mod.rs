//! Out-of-process execution.
//!
//! [`ProcessDriver`] spawns one interpreter per call with the artifact path as
//! its only script argument, drains stdout and stderr incrementally on reader
//! threads, and returns once the process has terminated. It does no parsing.
//!
//! Two budgets are enforced: a wall-clock cap and a cap on retained output.
//! When either runs out the process receives SIGTERM, then SIGKILL after the
//! grace period.

use crate::config::apply_env_policy;
use crate::model::{Budgets, EnvPolicy, ExecutorConfig, ExitRecord};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Interval between exit checks while a process runs.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Read size for the output drains.
const READ_CHUNK: usize = 8 * 1024;
/// How long to wait for the drains after exit. A grandchild that inherited
/// the pipes can keep them open indefinitely.
const DRAIN_WAIT: Duration = Duration::from_millis(500);

/// Failure to run a process at all.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The program could not be started (missing or not executable).
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Waiting on the child failed.
    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        /// Child process id.
        pid: u32,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// How a process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own with this status code.
    Code(i32),
    /// Killed by a signal it did not get from the harness.
    Signal(i32),
    /// Stopped by the harness after the runtime budget ran out.
    TimedOut,
    /// Stopped by the harness after the output budget ran out.
    OutputLimitExceeded,
}

impl ProcessExit {
    /// True for a zero exit code.
    pub fn success(self) -> bool {
        self == Self::Code(0)
    }

    /// Serializable form.
    pub fn to_record(self) -> ExitRecord {
        ExitRecord {
            code: match self {
                Self::Code(code) => Some(code),
                _ => None,
            },
            signal: match self {
                Self::Signal(signal) => Some(signal),
                _ => None,
            },
            timed_out: self == Self::TimedOut,
            output_truncated: self == Self::OutputLimitExceeded,
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Code(-1)
    }
}

/// Lifecycle of a spawned process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    /// About to spawn.
    Spawning,
    /// Running with this pid.
    Running {
        /// Child process id.
        pid: u32,
    },
    /// Terminated.
    Exited(ProcessExit),
    /// Never started.
    FailedToSpawn,
}

/// Everything captured from one process run.
#[derive(Clone, Debug)]
pub struct ProcessOutput {
    /// Captured stdout, lossily decoded as UTF-8.
    pub stdout: String,
    /// Captured stderr, lossily decoded as UTF-8.
    pub stderr: String,
    /// How the process ended.
    pub exit: ProcessExit,
    /// Child process id.
    pub pid: u32,
    /// Time from spawn to termination.
    pub elapsed: Duration,
}

/// Shared byte budget for both output streams.
#[derive(Debug)]
struct OutputBudget {
    limit: u64,
    used: AtomicU64,
    exceeded: AtomicBool,
}

impl OutputBudget {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
            exceeded: AtomicBool::new(false),
        }
    }

    /// Reserve `len` bytes and return how many of them may be kept.
    fn claim(&self, len: usize) -> usize {
        let requested = u64::try_from(len).unwrap_or(u64::MAX);
        let before = self.used.fetch_add(requested, Ordering::SeqCst);
        let allowed = self.limit.saturating_sub(before).min(requested);
        if allowed < requested {
            self.exceeded.store(true, Ordering::SeqCst);
        }
        usize::try_from(allowed).unwrap_or(len)
    }

    fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// One output stream being drained on its own thread.
#[derive(Debug)]
struct Drain {
    buffer: SharedBuffer,
    thread: JoinHandle<()>,
}

impl Drain {
    fn spawn<R: Read + Send + 'static>(mut pipe: R, budget: Arc<OutputBudget>) -> Self {
        let buffer = SharedBuffer::default();
        let sink = Arc::clone(&buffer);
        let thread = std::thread::spawn(move || {
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(count) => {
                        let allowed = budget.claim(count);
                        if let (Some(kept), Ok(mut buffer)) = (chunk.get(..allowed), sink.lock()) {
                            buffer.extend_from_slice(kept);
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        });
        Self { buffer, thread }
    }

    /// Wait for end of stream until `deadline`, then take what was read.
    fn collect(self, deadline: Instant) -> Vec<u8> {
        while !self.thread.is_finished() && Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
        }
        if self.thread.is_finished() {
            let _ = self.thread.join();
        }
        self.buffer
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .unwrap_or_default()
    }
}

/// A running child plus the threads draining its output.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    state: ProcessState,
    stdout: Option<Drain>,
    stderr: Option<Drain>,
    budget: Arc<OutputBudget>,
    started_at: Instant,
}

impl ProcessHandle {
    /// Spawn `command` with piped output and a null stdin.
    pub fn spawn(mut command: Command, max_output_bytes: u64) -> Result<Self, ProcessError> {
        let program = command.get_program().to_string_lossy().into_owned();
        tracing::debug!(program = %program, state = ?ProcessState::Spawning, "spawning process");
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| {
            tracing::debug!(program = %program, state = ?ProcessState::FailedToSpawn, "spawn failed");
            ProcessError::Spawn { program, source }
        })?;

        let budget = Arc::new(OutputBudget::new(max_output_bytes));
        let stdout = child.stdout.take().map(|pipe| Drain::spawn(pipe, Arc::clone(&budget)));
        let stderr = child.stderr.take().map(|pipe| Drain::spawn(pipe, Arc::clone(&budget)));
        let state = ProcessState::Running { pid: child.id() };
        tracing::debug!(state = ?state, "process running");
        Ok(Self {
            child,
            state,
            stdout,
            stderr,
            budget,
            started_at: Instant::now(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Child process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Block until the process ends, enforcing `timeout` and the output budget.
    pub fn wait(mut self, timeout: Duration, grace: Duration) -> Result<ProcessOutput, ProcessError> {
        let deadline = self.started_at + timeout;
        let pid = self.child.id();
        let exit = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break ProcessExit::from_status(status),
                Ok(None) => {}
                Err(source) => return Err(ProcessError::Wait { pid, source }),
            }
            if self.budget.exceeded() {
                tracing::warn!(pid, limit = self.budget.limit, "output budget exceeded; stopping process");
                self.terminate(grace)?;
                break ProcessExit::OutputLimitExceeded;
            }
            if Instant::now() >= deadline {
                tracing::warn!(pid, timeout_ms = timeout.as_millis(), "runtime budget exceeded; stopping process");
                self.terminate(grace)?;
                break ProcessExit::TimedOut;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let drained_by = Instant::now() + DRAIN_WAIT;
        let stdout = self.stdout.take().map(|d| d.collect(drained_by)).unwrap_or_default();
        let stderr = self.stderr.take().map(|d| d.collect(drained_by)).unwrap_or_default();
        // a process can overrun the budget and exit between two polls
        let exit = match exit {
            ProcessExit::Code(_) | ProcessExit::Signal(_) if self.budget.exceeded() => {
                tracing::warn!(pid, limit = self.budget.limit, "output budget exceeded before exit");
                ProcessExit::OutputLimitExceeded
            }
            other => other,
        };
        self.state = ProcessState::Exited(exit);
        tracing::debug!(pid, state = ?self.state, "process finished");
        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit,
            pid,
            elapsed: self.started_at.elapsed(),
        })
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError> {
        let pid = self.child.id();
        if self.request_stop(grace)? {
            return Ok(());
        }
        let _ = self.child.kill();
        self.child
            .wait()
            .map(|_| ())
            .map_err(|source| ProcessError::Wait { pid, source })
    }
}

impl ProcessHandle {
    /// Send SIGTERM and wait up to `grace`. Returns true if the process exited.
    #[cfg(unix)]
    fn request_stop(&mut self, grace: Duration) -> Result<bool, ProcessError> {
        let pid = self.child.id();
        let Ok(raw) = i32::try_from(pid) else {
            return Ok(false);
        };
        // ESRCH means the process is already gone
        let _ = kill(Pid::from_raw(raw), Signal::SIGTERM);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => return Ok(true),
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(source) => return Err(ProcessError::Wait { pid, source }),
            }
        }
        Ok(false)
    }

    #[cfg(not(unix))]
    #[allow(clippy::unused_self, clippy::unnecessary_wraps)]
    fn request_stop(&mut self, _grace: Duration) -> Result<bool, ProcessError> {
        Ok(false)
    }
}

/// Spawns interpreter processes under the configured budgets and environment.
#[derive(Clone, Debug)]
pub struct ProcessDriver {
    interpreter: String,
    interpreter_args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: EnvPolicy,
    budgets: Budgets,
}

impl ProcessDriver {
    /// Driver for the interpreter named in `config`.
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            interpreter_args: config.interpreter_args.clone(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
            budgets: config.budgets.clone(),
        }
    }

    /// Replace the budgets, e.g. for long-running package installs.
    #[must_use]
    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Interpreter this driver spawns.
    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Run the interpreter against `artifact` and wait for it to finish.
    pub fn run(&self, artifact: &Path) -> Result<ProcessOutput, ProcessError> {
        let mut args: Vec<String> = self.interpreter_args.clone();
        args.push(artifact.display().to_string());
        self.run_with_args(&args)
    }

    /// Run the interpreter with explicit arguments.
    pub fn run_with_args(&self, args: &[String]) -> Result<ProcessOutput, ProcessError> {
        let mut command = Command::new(&self.interpreter);
        command.args(args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        apply_env_policy(&self.env, &mut command);
        let handle = ProcessHandle::spawn(command, self.budgets.max_output_bytes)?;
        handle.wait(
            Duration::from_millis(self.budgets.max_runtime_ms),
            Duration::from_millis(self.budgets.kill_grace_ms),
        )
    }
}
