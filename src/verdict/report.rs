/// Execution report returned to callers
use crate::config::types::{ErrorClass, SandboxCapability};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Details pulled out of a runtime traceback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Line in the submitted source, prelude offset removed
    pub line_number: Option<usize>,
    /// Undefined name for `name_error`
    pub variable_name: Option<String>,
    /// Traceback text from `Traceback` to the end of stderr
    pub traceback: Option<String>,
}

/// Outcome of one `execute` call.
///
/// `output` holds the decoded payload on success, raw stdout when the
/// payload is missing or malformed, and stdout (possibly empty) on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub error_class: Option<ErrorClass>,
    pub preflight_failed: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub isolation: SandboxCapability,
    pub reduced_isolation: bool,
    pub error_context: Option<ErrorContext>,
    pub code_hash: String,
}

impl ExecutionReport {
    /// Report for a run that never reached the interpreter.
    pub fn rejected(
        error_class: ErrorClass,
        message: String,
        preflight_failed: bool,
        isolation: SandboxCapability,
        code_hash: String,
    ) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(message),
            stdout: String::new(),
            stderr: String::new(),
            error_class: Some(error_class),
            preflight_failed,
            exit_code: None,
            duration_ms: 0,
            stdout_truncated: false,
            stderr_truncated: false,
            isolation,
            reduced_isolation: isolation.is_reduced(),
            error_context: None,
            code_hash,
        }
    }

    /// Decoded structured payload, if the run produced one.
    pub fn payload(&self) -> Option<&Value> {
        if self.success && self.error_class.is_none() {
            Some(&self.output)
        } else {
            None
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
