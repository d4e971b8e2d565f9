//! Isolation backend selector
//!
//! Probes the host once per process and hands out the matching backend.
use crate::config::types::{Result, SandboxCapability, SandboxError};
use crate::isolation::bare::BareBackend;
use crate::isolation::bubblewrap::BubblewrapBackend;
use crate::isolation::seatbelt::SeatbeltBackend;
use crate::isolation::windows::WindowsRestrictedBackend;
use crate::isolation::IsolationBackend;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Result of the host probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub capability: SandboxCapability,
    /// Launcher binary, for capabilities that need one
    pub launcher: Option<PathBuf>,
}

static PROBE: OnceLock<ProbeResult> = OnceLock::new();

fn probe_host() -> ProbeResult {
    if cfg!(target_os = "linux") {
        if let Ok(bwrap) = which::which("bwrap") {
            return ProbeResult {
                capability: SandboxCapability::LinuxNamespaces,
                launcher: Some(bwrap),
            };
        }
    } else if cfg!(target_os = "macos") {
        if let Ok(sandbox_exec) = which::which("sandbox-exec") {
            return ProbeResult {
                capability: SandboxCapability::MacosProfile,
                launcher: Some(sandbox_exec),
            };
        }
    } else if cfg!(windows) {
        return ProbeResult {
            capability: SandboxCapability::WindowsRestricted,
            launcher: None,
        };
    }

    ProbeResult {
        capability: SandboxCapability::None,
        launcher: None,
    }
}

pub struct SandboxSelector;

impl SandboxSelector {
    /// Cached host probe.
    pub fn probe() -> &'static ProbeResult {
        PROBE.get_or_init(probe_host)
    }

    /// Best backend available on this host.
    pub fn select() -> Arc<dyn IsolationBackend> {
        let probe = Self::probe();
        let backend: Arc<dyn IsolationBackend> = match (&probe.capability, &probe.launcher) {
            (SandboxCapability::LinuxNamespaces, Some(bwrap)) => {
                info!("Using bubblewrap sandbox ({})", bwrap.display());
                Arc::new(BubblewrapBackend::new(bwrap.clone()))
            }
            (SandboxCapability::MacosProfile, Some(sandbox_exec)) => {
                info!("Using sandbox-exec profile ({})", sandbox_exec.display());
                Arc::new(SeatbeltBackend::new(sandbox_exec.clone()))
            }
            (SandboxCapability::WindowsRestricted, _) => {
                info!("Using restricted Windows process launch");
                Arc::new(WindowsRestrictedBackend)
            }
            _ => {
                info!("No OS sandbox available, using bare interpreter launch");
                Arc::new(BareBackend)
            }
        };

        if backend.reduced_isolation() {
            warn!(
                "Reduced isolation: {} relies on static analysis and the timeout only",
                backend.capability()
            );
        }
        backend
    }

    /// Backend for an explicitly requested capability.
    pub fn for_capability(capability: SandboxCapability) -> Result<Arc<dyn IsolationBackend>> {
        let backend: Arc<dyn IsolationBackend> = match capability {
            SandboxCapability::LinuxNamespaces => {
                Arc::new(BubblewrapBackend::detect().ok_or_else(|| {
                    SandboxError::Config("linux_namespaces requested but bwrap is not on PATH".to_string())
                })?)
            }
            SandboxCapability::MacosProfile => {
                Arc::new(SeatbeltBackend::detect().ok_or_else(|| {
                    SandboxError::Config(
                        "macos_profile requested but sandbox-exec is not on PATH".to_string(),
                    )
                })?)
            }
            SandboxCapability::WindowsRestricted => Arc::new(WindowsRestrictedBackend),
            SandboxCapability::None => Arc::new(BareBackend),
        };

        info!("Using requested {} backend", backend.name());
        if backend.reduced_isolation() {
            warn!("Reduced isolation requested: {}", capability);
        }
        Ok(backend)
    }
}
