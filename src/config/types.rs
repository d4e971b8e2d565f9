/// Core types shared across the scriptbox engine
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Closed failure taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Syntax,
    ForbiddenImport,
    SecurityViolation,
    Timeout,
    ResourceExceeded,
    NameError,
    TypeError,
    ValueError,
    AttributeError,
    KeyError,
    ZeroDivision,
    IndexError,
    MissingModule,
    MalformedOutput,
    Unknown,
}

impl ErrorClass {
    /// Wire name of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Syntax => "syntax",
            ErrorClass::ForbiddenImport => "forbidden_import",
            ErrorClass::SecurityViolation => "security_violation",
            ErrorClass::Timeout => "timeout",
            ErrorClass::ResourceExceeded => "resource_exceeded",
            ErrorClass::NameError => "name_error",
            ErrorClass::TypeError => "type_error",
            ErrorClass::ValueError => "value_error",
            ErrorClass::AttributeError => "attribute_error",
            ErrorClass::KeyError => "key_error",
            ErrorClass::ZeroDivision => "zero_division",
            ErrorClass::IndexError => "index_error",
            ErrorClass::MissingModule => "missing_module",
            ErrorClass::MalformedOutput => "malformed_output",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Classes produced before any process is spawned.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            ErrorClass::Syntax | ErrorClass::ForbiddenImport | ErrorClass::SecurityViolation
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS isolation primitive available on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxCapability {
    LinuxNamespaces,
    MacosProfile,
    WindowsRestricted,
    None,
}

impl SandboxCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxCapability::LinuxNamespaces => "linux_namespaces",
            SandboxCapability::MacosProfile => "macos_profile",
            SandboxCapability::WindowsRestricted => "windows_restricted",
            SandboxCapability::None => "none",
        }
    }

    /// True when containment rests on the analyzer and the timeout alone.
    pub fn is_reduced(&self) -> bool {
        matches!(
            self,
            SandboxCapability::WindowsRestricted | SandboxCapability::None
        )
    }
}

impl fmt::Display for SandboxCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SandboxCapability {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linux_namespaces" => Ok(SandboxCapability::LinuxNamespaces),
            "macos_profile" => Ok(SandboxCapability::MacosProfile),
            "windows_restricted" => Ok(SandboxCapability::WindowsRestricted),
            "none" => Ok(SandboxCapability::None),
            other => Err(SandboxError::Config(format!(
                "Unknown sandbox capability: {}",
                other
            ))),
        }
    }
}

/// Executor construction settings.
///
/// Everything here is host-side plumbing. What the submitted script may do
/// lives in [`crate::config::policy::Policy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Interpreter path or bare name resolved on `PATH`
    pub interpreter: PathBuf,
    /// Parent of every per-run workspace directory
    pub work_root: PathBuf,
    /// Debug copies of submitted sources, keyed by content hash
    pub artifact_dir: Option<PathBuf>,
    /// Append-only JSON-lines audit trail
    pub audit_path: Option<PathBuf>,
    pub determinism_seed: u64,
    pub fixed_time: DateTime<Utc>,
    /// Skip probing and use this capability
    pub capability: Option<SandboxCapability>,
}

/// 2024-01-01T00:00:00Z
pub const DEFAULT_FIXED_TIMESTAMP: i64 = 1_704_067_200;
pub const DEFAULT_DETERMINISM_SEED: u64 = 42;

impl Default for ExecutorConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("scriptbox");
        Self {
            interpreter: PathBuf::from("python3"),
            work_root: base.join("runs"),
            artifact_dir: Some(base.join("artifacts")),
            audit_path: None,
            determinism_seed: DEFAULT_DETERMINISM_SEED,
            fixed_time: DateTime::from_timestamp(DEFAULT_FIXED_TIMESTAMP, 0).unwrap_or_default(),
            capability: None,
        }
    }
}

/// Errors raised by the engine's infrastructure.
///
/// Script failures are never errors: they are reported through
/// [`crate::verdict::report::ExecutionReport`].
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Python interpreter not found: {0}")]
    InterpreterNotFound(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Workspace error: {0}")]
    Workspace(String),
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::Config(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_class_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::ZeroDivision).unwrap();
        assert_eq!(json, "\"zero_division\"");
        let back: ErrorClass = serde_json::from_str("\"missing_module\"").unwrap();
        assert_eq!(back, ErrorClass::MissingModule);
        assert_eq!(ErrorClass::MalformedOutput.to_string(), "malformed_output");
    }

    #[test]
    fn preflight_classes() {
        assert!(ErrorClass::Syntax.is_preflight());
        assert!(ErrorClass::SecurityViolation.is_preflight());
        assert!(!ErrorClass::Timeout.is_preflight());
    }

    #[test]
    fn capability_roundtrip_and_reduced() {
        for cap in [
            SandboxCapability::LinuxNamespaces,
            SandboxCapability::MacosProfile,
            SandboxCapability::WindowsRestricted,
            SandboxCapability::None,
        ] {
            assert_eq!(cap.as_str().parse::<SandboxCapability>().unwrap(), cap);
        }
        assert!(SandboxCapability::None.is_reduced());
        assert!(SandboxCapability::WindowsRestricted.is_reduced());
        assert!(!SandboxCapability::LinuxNamespaces.is_reduced());
        assert!("chroot".parse::<SandboxCapability>().is_err());
    }

    #[test]
    fn default_config_pins_2024() {
        let config = ExecutorConfig::default();
        assert_eq!(config.fixed_time.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(config.determinism_seed, 42);
    }
}
