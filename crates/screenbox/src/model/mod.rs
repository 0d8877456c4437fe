//! Data types shared by every stage of an execution.

pub mod config;
pub mod ids;
pub mod result;
pub mod screener;

pub use config::*;
pub use ids::ExecutionId;
pub use result::*;
pub use screener::*;

/// Sentinel printed by the harness on the line before the result JSON.
pub const RESULT_START_MARKER: &str = "RESULT_JSON_START";
/// Sentinel printed by the harness on the line after the result JSON.
pub const RESULT_END_MARKER: &str = "RESULT_JSON_END";

/// Entry function every screener body must define.
pub const ENTRY_FUNCTION: &str = "screen_stocks";
