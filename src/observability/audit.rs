/// Security audit events
///
/// Every event goes to the `log` facade at a level derived from its
/// severity and, when an audit path is configured, is appended as one JSON
/// line to the audit file.
use crate::config::types::{Result, SandboxCapability, SandboxError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    ExecutionStart,
    ExecutionEnd,
    PreflightRejected,
    CapabilityDecision,
    ControlDegraded,
    LimitSkipped,
    WallTimeLimitViolation,
    OutputLimitViolation,
    ForcedKill,
    InfrastructureFailure,
    CleanupFailure,
}

impl SecurityEventType {
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::ExecutionStart => SecuritySeverity::Low,
            SecurityEventType::ExecutionEnd => SecuritySeverity::Low,
            SecurityEventType::CapabilityDecision => SecuritySeverity::Low,
            SecurityEventType::PreflightRejected => SecuritySeverity::Medium,
            SecurityEventType::OutputLimitViolation => SecuritySeverity::Medium,
            SecurityEventType::LimitSkipped => SecuritySeverity::Medium,
            SecurityEventType::ControlDegraded => SecuritySeverity::High,
            SecurityEventType::WallTimeLimitViolation => SecuritySeverity::High,
            SecurityEventType::ForcedKill => SecuritySeverity::High,
            SecurityEventType::InfrastructureFailure => SecuritySeverity::High,
            SecurityEventType::CleanupFailure => SecuritySeverity::Critical,
        }
    }
}

/// Identifiers tying the events of one invocation together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    /// One per `execute` call
    pub request_id: String,
    /// Workspace run id, once a workspace exists
    pub run_id: Option<String>,
    pub code_hash: String,
    /// Root PID in the host namespace
    pub root_pid: Option<u32>,
}

impl CorrelationIds {
    pub fn new(code_hash: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            run_id: None,
            code_hash: code_hash.to_string(),
            root_pid: None,
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn with_root_pid(mut self, pid: u32) -> Self {
        self.root_pid = Some(pid);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub isolation: Option<SandboxCapability>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: chrono::Utc::now(),
            details: details.into(),
            correlation: None,
            isolation: None,
        }
    }

    pub fn with_correlation(mut self, correlation: &CorrelationIds) -> Self {
        self.correlation = Some(correlation.clone());
        self
    }

    pub fn with_isolation(mut self, isolation: SandboxCapability) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn with_severity(mut self, severity: SecuritySeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Audit sink owned by an executor.
#[derive(Debug)]
pub struct AuditLog {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Log-only sink.
    pub fn disabled() -> Self {
        Self {
            file: None,
            path: None,
        }
    }

    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::disabled());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SandboxError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            file: Some(Mutex::new(file)),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, event: SecurityEvent) {
        let run = event
            .correlation
            .as_ref()
            .map(|c| c.request_id.as_str())
            .unwrap_or("-");

        match event.severity {
            SecuritySeverity::Critical | SecuritySeverity::High => {
                error!("SECURITY {:?} [{}]: {}", event.event_type, run, event.details)
            }
            SecuritySeverity::Medium => {
                warn!("SECURITY {:?} [{}]: {}", event.event_type, run, event.details)
            }
            SecuritySeverity::Low => {
                info!("SECURITY {:?} [{}]: {}", event.event_type, run, event.details)
            }
        }

        let Some(file) = &self.file else {
            return;
        };

        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write audit log: {}", e);
                }
            }
            Err(_) => error!("Audit log lock poisoned"),
        }
    }
}

/// Convenience constructors for the events the executor emits.
pub mod events {
    use super::*;

    pub fn execution_start(ids: &CorrelationIds, isolation: SandboxCapability) -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::ExecutionStart, "execution started")
            .with_correlation(ids)
            .with_isolation(isolation)
    }

    pub fn execution_end(ids: &CorrelationIds, summary: String) -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::ExecutionEnd, summary).with_correlation(ids)
    }

    pub fn preflight_rejected(ids: &CorrelationIds, message: &str) -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::PreflightRejected, message).with_correlation(ids)
    }

    pub fn control_degraded(isolation: SandboxCapability) -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::ControlDegraded,
            format!("reduced isolation: {}", isolation),
        )
        .with_isolation(isolation)
    }

    pub fn limit_skipped(ids: &CorrelationIds, limits: &[String]) -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::LimitSkipped,
            format!("host refused ceilings: {}", limits.join(", ")),
        )
        .with_correlation(ids)
    }

    pub fn timeout_kill(ids: &CorrelationIds, timeout_secs: f64) -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::ForcedKill,
            format!("process group killed after {}s wall clock", timeout_secs),
        )
        .with_correlation(ids)
    }

    pub fn output_truncated(ids: &CorrelationIds, stream: &str, total: usize, limit: usize) -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::OutputLimitViolation,
            format!("{} wrote {} bytes, kept {}", stream, total, limit),
        )
        .with_correlation(ids)
    }

    pub fn infrastructure_failure(ids: &CorrelationIds, error: &str) -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::InfrastructureFailure, error).with_correlation(ids)
    }

    pub fn cleanup_failure(ids: &CorrelationIds, error: &str) -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::CleanupFailure, error).with_correlation(ids)
    }
}
