use crate::model::ErrorInfo;
use serde_json::Value;
use std::fmt;

/// Stable error codes shared by results, logs and CLI exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The definition could not be turned into a program.
    Assembly,
    /// A package install failed. Never fatal on its own.
    LibraryInstall,
    /// The interpreter could not be started.
    ProcessSpawn,
    /// The interpreter exited non-zero without a usable payload.
    ProcessExit,
    /// No extraction strategy recovered a payload.
    OutputParse,
    /// The harness caught a fault in user code and reported it in-band.
    UserLogic,
    /// The runtime budget ran out.
    Timeout,
    /// The output budget ran out.
    OutputLimit,
    /// Invalid executor configuration.
    Config,
    /// Malformed definition or config document.
    Protocol,
    /// Filesystem or other I/O failure inside the executor.
    Io,
}

impl ErrorCode {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assembly => "E_ASSEMBLY",
            Self::LibraryInstall => "E_LIBRARY_INSTALL",
            Self::ProcessSpawn => "E_PROCESS_SPAWN",
            Self::ProcessExit => "E_PROCESS_EXIT",
            Self::OutputParse => "E_OUTPUT_PARSE",
            Self::UserLogic => "E_USER_LOGIC",
            Self::Timeout => "E_TIMEOUT",
            Self::OutputLimit => "E_OUTPUT_LIMIT",
            Self::Config => "E_CONFIG",
            Self::Protocol => "E_PROTOCOL",
            Self::Io => "E_IO",
        }
    }

    /// Parse a wire code.
    pub fn parse(code: &str) -> Option<Self> {
        let code = match code {
            "E_ASSEMBLY" => Self::Assembly,
            "E_LIBRARY_INSTALL" => Self::LibraryInstall,
            "E_PROCESS_SPAWN" => Self::ProcessSpawn,
            "E_PROCESS_EXIT" => Self::ProcessExit,
            "E_OUTPUT_PARSE" => Self::OutputParse,
            "E_USER_LOGIC" => Self::UserLogic,
            "E_TIMEOUT" => Self::Timeout,
            "E_OUTPUT_LIMIT" => Self::OutputLimit,
            "E_CONFIG" => Self::Config,
            "E_PROTOCOL" => Self::Protocol,
            "E_IO" => Self::Io,
            _ => return None,
        };
        Some(code)
    }

    /// CLI exit code.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::UserLogic => 1,
            Self::Config | Self::Protocol => 2,
            Self::Assembly => 3,
            Self::ProcessSpawn => 4,
            Self::ProcessExit => 5,
            Self::OutputParse => 6,
            Self::Timeout | Self::OutputLimit => 7,
            Self::LibraryInstall => 8,
            Self::Io => 9,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result alias used across the crate.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Error surfaced at the subsystem boundary.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("{code}: {message}")]
pub struct RunnerError {
    /// Error category.
    pub code: ErrorCode,
    /// Human-readable summary.
    pub message: String,
    /// Machine-readable context.
    pub context: Option<Value>,
}

impl RunnerError {
    /// Build an error with an arbitrary code.
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        context: impl Into<Option<Value>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    /// Invalid configuration.
    pub fn config(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Config, message, context)
    }

    /// Malformed input document.
    pub fn protocol(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Protocol, message, context)
    }

    /// I/O failure, keeping the source error text as context.
    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Io,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    /// Serializable failure record.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }

    /// CLI exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}
