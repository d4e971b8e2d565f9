//! OS isolation backends
//!
//! One [`IsolationBackend`] per [`SandboxCapability`]. The backend only
//! decides how the interpreter is launched; resource ceilings, timeouts and
//! output capture are the runner's job and identical for every backend.

pub mod bare;
pub mod bubblewrap;
pub mod seatbelt;
pub mod selector;
pub mod windows;

use crate::config::types::{Result, SandboxCapability};
use std::ffi::OsString;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

pub use selector::SandboxSelector;

/// Interpreter flags: no bytecode files, unbuffered streams.
pub const INTERPRETER_FLAGS: &[&str] = &["-B", "-u"];

/// Everything a backend needs to launch one run.
#[derive(Debug, Clone)]
pub struct LaunchTarget<'a> {
    /// Absolute interpreter path
    pub interpreter: &'a Path,
    /// Absolute path of the script inside the run directory
    pub source_file: &'a Path,
    /// Run directory, the only writable location
    pub output_dir: &'a Path,
    pub extra_readonly_paths: &'a [PathBuf],
}

/// A fully specified process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: PathBuf,
    /// Temp directory as seen by the child
    pub tmp_dir: PathBuf,
    /// The launcher forks before exec'ing the interpreter
    pub launcher_forks: bool,
    /// Windows process creation flags
    pub creation_flags: u32,
}

impl ProcessSpec {
    /// Plain `interpreter -B -u source` launch in the run directory.
    pub fn direct(target: &LaunchTarget<'_>) -> Self {
        let mut args: Vec<OsString> = INTERPRETER_FLAGS.iter().map(OsString::from).collect();
        args.push(target.source_file.as_os_str().to_owned());
        Self {
            program: target.interpreter.to_path_buf(),
            args,
            current_dir: target.output_dir.to_path_buf(),
            tmp_dir: target.output_dir.to_path_buf(),
            launcher_forks: false,
            creation_flags: 0,
        }
    }
}

/// Launch strategy for one isolation primitive.
pub trait IsolationBackend: Send + Sync + Debug {
    fn capability(&self) -> SandboxCapability;

    fn name(&self) -> &'static str;

    fn build_command(&self, target: &LaunchTarget<'_>) -> Result<ProcessSpec>;

    /// True when containment rests on the analyzer and the timeout alone.
    fn reduced_isolation(&self) -> bool {
        self.capability().is_reduced()
    }
}

/// Installation prefix of an interpreter: `/opt/py/bin/python3` → `/opt/py`.
pub fn interpreter_prefix(interpreter: &Path) -> Option<PathBuf> {
    let dir = interpreter.parent()?;
    match dir.file_name().and_then(|n| n.to_str()) {
        Some("bin") | Some("Scripts") => dir.parent().map(Path::to_path_buf),
        _ => Some(dir.to_path_buf()),
    }
}

/// Prefixes the sandbox must expose for the interpreter to start: the
/// prefix of the given path and, if it is a symlink, of its target.
pub fn interpreter_roots(interpreter: &Path) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(prefix) = interpreter_prefix(interpreter) {
        roots.push(prefix);
    }
    if let Ok(canonical) = std::fs::canonicalize(interpreter) {
        if let Some(prefix) = interpreter_prefix(&canonical) {
            if !roots.contains(&prefix) {
                roots.push(prefix);
            }
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_strips_bin() {
        assert_eq!(
            interpreter_prefix(Path::new("/opt/py311/bin/python3")),
            Some(PathBuf::from("/opt/py311"))
        );
        assert_eq!(
            interpreter_prefix(Path::new("/usr/local/python3")),
            Some(PathBuf::from("/usr/local"))
        );
    }

    #[test]
    fn direct_spec_runs_in_output_dir() {
        let target = LaunchTarget {
            interpreter: Path::new("/usr/bin/python3"),
            source_file: Path::new("/tmp/run/main.py"),
            output_dir: Path::new("/tmp/run"),
            extra_readonly_paths: &[],
        };
        let spec = ProcessSpec::direct(&target);
        assert_eq!(spec.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(spec.args, vec!["-B", "-u", "/tmp/run/main.py"]);
        assert_eq!(spec.current_dir, PathBuf::from("/tmp/run"));
        assert!(!spec.launcher_forks);
    }
}
