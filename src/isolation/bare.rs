//! No OS isolation primitive available
use crate::config::types::{Result, SandboxCapability};
use crate::isolation::{IsolationBackend, LaunchTarget, ProcessSpec};

/// Bare interpreter launch. Resource ceilings still apply on POSIX.
#[derive(Debug, Clone, Default)]
pub struct BareBackend;

impl IsolationBackend for BareBackend {
    fn capability(&self) -> SandboxCapability {
        SandboxCapability::None
    }

    fn name(&self) -> &'static str {
        "bare"
    }

    fn build_command(&self, target: &LaunchTarget<'_>) -> Result<ProcessSpec> {
        Ok(ProcessSpec::direct(target))
    }
}
