//! Script assembly: turns a [`ScreenerDefinition`] into a complete program.
//!
//! An assembled program is the concatenation, in fixed order, of a preamble,
//! a helper library, the verbatim user body, and a harness that calls the
//! entry function and prints its result as JSON between the
//! [`RESULT_START_MARKER`] and [`RESULT_END_MARKER`] sentinels.
//!
//! Assembly never inspects the user body beyond two checks: it must not be
//! blank, and the finished program must hold exactly one pair of sentinel
//! markers. Whether the body is valid code is decided by the interpreter at
//! execution time.

pub mod literal;
pub mod python;
pub mod template;

pub use python::PythonAssembler;
pub use template::{ProgramTemplate, Slot};

use crate::model::{ScreenerDefinition, RESULT_END_MARKER, RESULT_START_MARKER};
use crate::runner::{ErrorCode, RunnerError};

/// Failure to assemble a program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    /// The definition has no script body.
    #[error("screener '{screener_id}' has empty source content")]
    EmptySource {
        /// Offending definition.
        screener_id: String,
    },
    /// A sentinel marker would appear outside the harness.
    #[error("screener '{screener_id}' would embed reserved marker '{marker}' in its program")]
    ReservedMarker {
        /// Offending definition.
        screener_id: String,
        /// The marker found.
        marker: &'static str,
    },
    /// A configuration value cannot be expressed safely in the program.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Configuration field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A template slot was filled twice.
    #[error("template slot '{0}' filled more than once")]
    DuplicateSlot(Slot),
    /// A template slot was never filled.
    #[error("template slot '{0}' was never filled")]
    MissingSlot(Slot),
}

impl From<AssemblyError> for RunnerError {
    fn from(err: AssemblyError) -> Self {
        let context = match &err {
            AssemblyError::EmptySource { screener_id } => {
                serde_json::json!({ "screener_id": screener_id })
            }
            AssemblyError::ReservedMarker {
                screener_id,
                marker,
            } => serde_json::json!({ "screener_id": screener_id, "marker": marker }),
            AssemblyError::InvalidValue { field, .. } => serde_json::json!({ "field": field }),
            AssemblyError::DuplicateSlot(slot) | AssemblyError::MissingSlot(slot) => {
                serde_json::json!({ "slot": slot.name() })
            }
        };
        RunnerError::new(ErrorCode::Assembly, err.to_string(), context)
    }
}

/// A fully assembled program, ready to be written to an artifact.
#[derive(Clone, Debug)]
pub struct AssembledProgram {
    /// Complete program text.
    pub source: String,
    /// File extension for the artifact, without the dot.
    pub extension: &'static str,
}

/// Produces runnable programs from screener definitions.
///
/// The executor only depends on this trait; [`PythonAssembler`] is the
/// production dialect.
pub trait ProgramAssembler: Send + Sync + std::fmt::Debug {
    /// Assemble a complete program.
    fn assemble(&self, definition: &ScreenerDefinition) -> Result<AssembledProgram, AssemblyError>;
}

/// Rejects a blank user body before any text is generated.
pub fn check_body(definition: &ScreenerDefinition) -> Result<&str, AssemblyError> {
    let body = definition.source.content();
    if body.trim().is_empty() {
        return Err(AssemblyError::EmptySource {
            screener_id: definition.id.clone(),
        });
    }
    Ok(body)
}

/// Verifies a rendered program carries exactly one start and one end marker,
/// start first. Anything else means a marker leaked in through the user body
/// or an embedded configuration value.
pub fn check_markers(screener_id: &str, source: &str) -> Result<(), AssemblyError> {
    for marker in [RESULT_START_MARKER, RESULT_END_MARKER] {
        if source.matches(marker).count() != 1 {
            return Err(AssemblyError::ReservedMarker {
                screener_id: screener_id.to_string(),
                marker,
            });
        }
    }
    match (source.find(RESULT_START_MARKER), source.find(RESULT_END_MARKER)) {
        (Some(start), Some(end)) if start < end => Ok(()),
        _ => Err(AssemblyError::ReservedMarker {
            screener_id: screener_id.to_string(),
            marker: RESULT_END_MARKER,
        }),
    }
}
