//! The normalized execution outcome.

use crate::model::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Normalized outcome of one screener execution.
///
/// This is the only type that crosses the subsystem boundary. Both success and
/// every expected failure mode are expressed through it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Identifier of the invocation that produced this result.
    pub execution_id: ExecutionId,
    /// Whether the screener ran to completion and reported success.
    pub success: bool,
    /// Matching symbols, in the order the screener reported them.
    pub matches: Vec<String>,
    /// Per-symbol attribute maps reported by the screener.
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    /// Wall-clock time spent in the invocation.
    pub execution_time_seconds: f64,
    /// When the invocation finished.
    pub timestamp: DateTime<Utc>,
    /// Extraction strategy that recovered the payload, if one did.
    #[serde(default)]
    pub strategy: Option<String>,
    /// How the interpreter process ended, if it was spawned.
    #[serde(default)]
    pub exit: Option<ExitRecord>,
    /// Failure record; present whenever `success` is false.
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    /// Raw output kept for support tooling; populated on failure.
    #[serde(default)]
    pub diagnostics: Option<Diagnostics>,
}

/// Structured failure record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    /// Stable error code, e.g. `E_PROCESS_EXIT`.
    pub code: String,
    /// Human-readable summary.
    pub message: String,
    /// Machine-readable context.
    pub context: Option<Value>,
}

/// How the interpreter process terminated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitRecord {
    /// Exit code when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal on unix.
    pub signal: Option<i32>,
    /// The harness stopped the process because the runtime budget ran out.
    pub timed_out: bool,
    /// The harness stopped the process because the output budget ran out.
    pub output_truncated: bool,
}

impl ExitRecord {
    /// True when the process exited on its own with status zero.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0) && !self.timed_out && !self.output_truncated
    }
}

/// Raw process output and parse analysis attached to failed results.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Traceback reported in-band by the harness.
    #[serde(default)]
    pub traceback: Option<String>,
    /// Size summary of the captured output.
    #[serde(default)]
    pub length_summary: Option<String>,
    /// Escaped prefix of stdout, exposing invisible characters.
    #[serde(default)]
    pub excerpt: Option<String>,
}

impl ExecutionResult {
    /// Build a failed result with no matches.
    pub fn failure(execution_id: ExecutionId, error: ErrorInfo) -> Self {
        Self {
            execution_id,
            success: false,
            matches: Vec::new(),
            details: BTreeMap::new(),
            execution_time_seconds: 0.0,
            timestamp: Utc::now(),
            strategy: None,
            exit: None,
            error: Some(error),
            diagnostics: None,
        }
    }

    /// Error code of a failed result.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|err| err.code.as_str())
    }

    /// End-user message: the error plus a diagnostic tail, bounded to `max_chars`.
    ///
    /// Full raw output stays in [`ExecutionResult::diagnostics`] for support tooling.
    pub fn user_message(&self, max_chars: usize) -> Option<String> {
        let error = self.error.as_ref()?;
        let detail = self.diagnostics.as_ref().and_then(|diag| {
            diag.traceback
                .as_deref()
                .filter(|tb| !tb.trim().is_empty())
                .or_else(|| Some(diag.stderr.as_str()).filter(|s| !s.trim().is_empty()))
        });
        let message = match detail {
            Some(detail) if !error.message.contains(detail.trim()) => {
                format!("{}\n{}", error.message, detail.trim_end())
            }
            _ => error.message.clone(),
        };
        Some(truncate_chars(&message, max_chars))
    }
}

/// Truncate to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
