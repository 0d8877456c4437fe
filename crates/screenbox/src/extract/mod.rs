//! Result extraction: recovers the harness payload from captured stdout.
//!
//! Extraction is an ordered chain of [`Strategy`] values, each a pure function
//! from stdout to a payload. The first strategy that succeeds wins; if none
//! does, the caller gets an [`OutputParseError`] carrying the raw output and an
//! escaped excerpt that exposes invisible characters.

use crate::model::{
    Diagnostics, ErrorInfo, ExecutionId, ExecutionResult, RESULT_END_MARKER, RESULT_START_MARKER,
};
use crate::runner::ErrorCode;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// Characters of stdout escaped into parse-failure excerpts by default.
pub const DEFAULT_EXCERPT_CHARS: usize = 500;

/// Why one strategy could not produce a payload.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// A sentinel marker is absent.
    #[error("marker '{0}' not found")]
    MarkerMissing(&'static str),
    /// No marker-delimited block matched.
    #[error("no marker-delimited block found")]
    NoMatch,
    /// The delimited text is not valid JSON.
    #[error("invalid JSON between markers: {0}")]
    InvalidJson(String),
    /// The delimited JSON is not an object.
    #[error("payload is {0}, expected an object")]
    NotAnObject(&'static str),
    /// The object has fields of the wrong type.
    #[error("payload has an unexpected shape: {0}")]
    InvalidShape(String),
    /// The fallback pattern failed to compile.
    #[error("extraction pattern unavailable: {0}")]
    Pattern(String),
}

/// Every strategy failed.
#[derive(Clone, Debug, thiserror::Error)]
#[error("could not extract a result from {length_summary} of output")]
pub struct OutputParseError {
    /// The raw stdout.
    pub stdout: String,
    /// Size summary of `stdout`.
    pub length_summary: String,
    /// Escaped prefix of `stdout`.
    pub excerpt: String,
    /// Each strategy's name and failure, in evaluation order.
    pub attempts: Vec<(&'static str, ExtractError)>,
}

impl OutputParseError {
    /// One line per failed strategy.
    pub fn attempts_summary(&self) -> String {
        let mut out = String::new();
        for (name, err) in &self.attempts {
            if !out.is_empty() {
                out.push_str("; ");
            }
            let _ = write!(out, "{name}: {err}");
        }
        out
    }
}

/// The JSON object printed by the harness.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ScreenerPayload {
    /// Absent means the harness completed normally.
    #[serde(default)]
    pub success: Option<bool>,
    /// Matching symbols, empty when absent.
    #[serde(default, deserialize_with = "null_as_default")]
    pub matches: Vec<String>,
    /// Per-symbol details.
    #[serde(default, deserialize_with = "null_as_default")]
    pub details: BTreeMap<String, Value>,
    /// Failure description reported in-band.
    #[serde(default)]
    pub error: Option<Value>,
    /// Traceback reported in-band.
    #[serde(default)]
    pub traceback: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ScreenerPayload {
    /// True when the harness reported failure.
    pub fn is_failure(&self) -> bool {
        self.success == Some(false)
    }

    /// In-band error text, if any.
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Wrap into an [`ExecutionResult`]. Failure payloads become `E_USER_LOGIC`.
    pub fn into_result(self, execution_id: ExecutionId, strategy: &str) -> ExecutionResult {
        let error = self.is_failure().then(|| ErrorInfo {
            code: ErrorCode::UserLogic.as_str().to_string(),
            message: self
                .error_message()
                .unwrap_or_else(|| "screener reported failure".to_string()),
            context: None,
        });
        let diagnostics = self.traceback.as_ref().map(|traceback| Diagnostics {
            traceback: Some(traceback.clone()),
            ..Diagnostics::default()
        });
        ExecutionResult {
            execution_id,
            success: !self.is_failure(),
            matches: self.matches,
            details: self.details,
            execution_time_seconds: 0.0,
            timestamp: Utc::now(),
            strategy: Some(strategy.to_string()),
            exit: None,
            error,
            diagnostics,
        }
    }
}

/// A successfully extracted payload and the strategy that found it.
#[derive(Clone, Debug, PartialEq)]
pub struct Extracted {
    /// Parsed payload.
    pub payload: ScreenerPayload,
    /// Name of the winning strategy.
    pub strategy: &'static str,
}

/// One extraction strategy.
#[derive(Clone, Copy, Debug)]
pub struct Strategy {
    /// Stable name, reported in results and logs.
    pub name: &'static str,
    /// Pure extraction function.
    pub run: fn(&str) -> Result<ScreenerPayload, ExtractError>,
}

/// Strategies in evaluation order.
pub const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "marker",
        run: marker_strategy,
    },
    Strategy {
        name: "regex",
        run: regex_strategy,
    },
];

/// Run the strategy chain with the default excerpt size.
pub fn extract(stdout: &str) -> Result<Extracted, OutputParseError> {
    extract_with(stdout, DEFAULT_EXCERPT_CHARS)
}

/// Run the strategy chain; `excerpt_chars` bounds the excerpt in the error.
pub fn extract_with(stdout: &str, excerpt_chars: usize) -> Result<Extracted, OutputParseError> {
    let mut attempts = Vec::with_capacity(STRATEGIES.len());
    for strategy in STRATEGIES {
        match (strategy.run)(stdout) {
            Ok(payload) => {
                tracing::debug!(strategy = strategy.name, matches = payload.matches.len(), "payload extracted");
                return Ok(Extracted {
                    payload,
                    strategy: strategy.name,
                });
            }
            Err(err) => {
                tracing::debug!(strategy = strategy.name, error = %err, "extraction strategy failed");
                attempts.push((strategy.name, err));
            }
        }
    }
    Err(OutputParseError {
        stdout: stdout.to_string(),
        length_summary: length_summary(stdout),
        excerpt: escaped_excerpt(stdout, excerpt_chars),
        attempts,
    })
}

/// Extract and wrap into an [`ExecutionResult`]; parse failures become a
/// failed result rather than an error.
pub fn extract_result(stdout: &str, execution_id: ExecutionId, excerpt_chars: usize) -> ExecutionResult {
    match extract_with(stdout, excerpt_chars) {
        Ok(extracted) => extracted.payload.into_result(execution_id, extracted.strategy),
        Err(err) => parse_failure(execution_id, &err, String::new()),
    }
}

/// Failed result for output no strategy could parse.
pub fn parse_failure(execution_id: ExecutionId, err: &OutputParseError, stderr: String) -> ExecutionResult {
    let info = ErrorInfo {
        code: ErrorCode::OutputParse.as_str().to_string(),
        message: err.to_string(),
        context: Some(serde_json::json!({ "attempts": err.attempts_summary() })),
    };
    let mut result = ExecutionResult::failure(execution_id, info);
    result.diagnostics = Some(Diagnostics {
        stdout: err.stdout.clone(),
        stderr,
        traceback: None,
        length_summary: Some(err.length_summary.clone()),
        excerpt: Some(err.excerpt.clone()),
    });
    result
}

/// Text strictly between the first start marker and the first end marker
/// after it.
pub fn marker_strategy(stdout: &str) -> Result<ScreenerPayload, ExtractError> {
    let start = stdout
        .find(RESULT_START_MARKER)
        .ok_or(ExtractError::MarkerMissing(RESULT_START_MARKER))?;
    let after = stdout
        .get(start + RESULT_START_MARKER.len()..)
        .unwrap_or_default();
    let end = after
        .find(RESULT_END_MARKER)
        .ok_or(ExtractError::MarkerMissing(RESULT_END_MARKER))?;
    parse_payload(after.get(..end).unwrap_or_default())
}

/// Whole-text scan for marker-delimited blocks; the first block that parses
/// wins, so a truncated block followed by a complete one still succeeds.
pub fn regex_strategy(stdout: &str) -> Result<ScreenerPayload, ExtractError> {
    let pattern = block_pattern()
        .as_ref()
        .map_err(|err| ExtractError::Pattern(err.to_string()))?;
    let mut last = ExtractError::NoMatch;
    for (offset, _) in stdout.match_indices(RESULT_START_MARKER) {
        let Some(block) = pattern.captures_at(stdout, offset).and_then(|caps| caps.get(1)) else {
            continue;
        };
        match parse_payload(block.as_str()) {
            Ok(payload) => return Ok(payload),
            Err(err) => last = err,
        }
    }
    Err(last)
}

fn block_pattern() -> &'static Result<Regex, regex::Error> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(
            r"(?s){}\s*(.*?)\s*{}",
            regex::escape(RESULT_START_MARKER),
            regex::escape(RESULT_END_MARKER)
        ))
    })
}

fn parse_payload(text: &str) -> Result<ScreenerPayload, ExtractError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|err| ExtractError::InvalidJson(err.to_string()))?;
    let kind = match &value {
        Value::Object(_) => None,
        Value::Null => Some("null"),
        Value::Bool(_) => Some("a boolean"),
        Value::Number(_) => Some("a number"),
        Value::String(_) => Some("a string"),
        Value::Array(_) => Some("an array"),
    };
    if let Some(kind) = kind {
        return Err(ExtractError::NotAnObject(kind));
    }
    serde_json::from_value(value).map_err(|err| ExtractError::InvalidShape(err.to_string()))
}

/// `"<chars> chars, <bytes> bytes, <lines> lines"`.
pub fn length_summary(stdout: &str) -> String {
    format!(
        "{} chars, {} bytes, {} lines",
        stdout.chars().count(),
        stdout.len(),
        stdout.lines().count()
    )
}

/// The first `max_chars` characters with control and invisible characters
/// escaped.
pub fn escaped_excerpt(stdout: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for ch in stdout.chars().take(max_chars) {
        let _ = write!(out, "{}", ch.escape_debug());
    }
    if stdout.chars().nth(max_chars).is_some() {
        out.push('…');
    }
    out
}
