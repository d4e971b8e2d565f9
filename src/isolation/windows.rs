//! Windows: hidden console, no OS sandbox
use crate::config::types::{Result, SandboxCapability};
use crate::isolation::{IsolationBackend, LaunchTarget, ProcessSpec};

pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Direct interpreter launch without a console window. Containment is the
/// analyzer plus the wall-clock timeout, so isolation is reduced.
#[derive(Debug, Clone, Default)]
pub struct WindowsRestrictedBackend;

impl IsolationBackend for WindowsRestrictedBackend {
    fn capability(&self) -> SandboxCapability {
        SandboxCapability::WindowsRestricted
    }

    fn name(&self) -> &'static str {
        "windows-restricted"
    }

    fn build_command(&self, target: &LaunchTarget<'_>) -> Result<ProcessSpec> {
        let mut spec = ProcessSpec::direct(target);
        spec.creation_flags = CREATE_NO_WINDOW;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn sets_no_window_flag() {
        let target = LaunchTarget {
            interpreter: Path::new("C:/Python311/python.exe"),
            source_file: Path::new("C:/runs/x/main.py"),
            output_dir: Path::new("C:/runs/x"),
            extra_readonly_paths: &[],
        };
        let spec = WindowsRestrictedBackend.build_command(&target).unwrap();
        assert_eq!(spec.creation_flags, CREATE_NO_WINDOW);
        assert!(WindowsRestrictedBackend.reduced_isolation());
    }
}
