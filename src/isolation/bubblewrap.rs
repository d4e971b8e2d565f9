//! Linux namespaces via bubblewrap
use crate::config::types::{Result, SandboxCapability, SandboxError};
use crate::isolation::{interpreter_roots, IsolationBackend, LaunchTarget, ProcessSpec, INTERPRETER_FLAGS};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Host directories exposed read-only inside the sandbox.
const SYSTEM_DIRS: &[&str] = &["/usr", "/lib", "/lib64", "/bin", "/sbin", "/etc"];

#[derive(Debug, Clone)]
pub struct BubblewrapBackend {
    bwrap: PathBuf,
}

impl BubblewrapBackend {
    pub fn new(bwrap: PathBuf) -> Self {
        Self { bwrap }
    }

    /// Locate `bwrap` on `PATH`.
    pub fn detect() -> Option<Self> {
        which::which("bwrap").ok().map(Self::new)
    }

    fn bwrap_args(&self, target: &LaunchTarget<'_>) -> Result<Vec<OsString>> {
        let output_dir = std::fs::canonicalize(target.output_dir).map_err(|e| {
            SandboxError::Workspace(format!(
                "Cannot resolve output dir {}: {}",
                target.output_dir.display(),
                e
            ))
        })?;
        let source_file = output_dir.join(target.source_file.file_name().ok_or_else(|| {
            SandboxError::Workspace(format!(
                "Source path has no file name: {}",
                target.source_file.display()
            ))
        })?);

        let mut args = ArgList::default();
        let mut bound: Vec<PathBuf> = Vec::new();

        for dir in SYSTEM_DIRS {
            let path = Path::new(dir);
            match std::fs::symlink_metadata(path) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    // Merged-/usr layouts: keep /lib -> usr/lib a symlink.
                    if let Ok(link) = std::fs::read_link(path) {
                        args.push("--symlink").push_path(&link).push_path(path);
                    }
                }
                Ok(_) => {
                    args.push("--ro-bind").push_path(path).push_path(path);
                    bound.push(path.to_path_buf());
                }
                Err(_) => {}
            }
        }

        let mut readonly = interpreter_roots(target.interpreter);
        readonly.extend(target.extra_readonly_paths.iter().cloned());
        for path in readonly {
            if bound.iter().any(|b| path.starts_with(b)) || !path.exists() {
                continue;
            }
            args.push("--ro-bind").push_path(&path).push_path(&path);
            bound.push(path);
        }

        args.push("--tmpfs").push("/tmp");
        args.push("--proc").push("/proc");
        args.push("--dev").push("/dev");
        args.push("--unshare-net");
        args.push("--unshare-pid");
        args.push("--die-with-parent");
        args.push("--new-session");
        args.push("--bind").push_path(&output_dir).push_path(&output_dir);
        args.push("--ro-bind").push_path(&source_file).push_path(&source_file);
        args.push("--chdir").push_path(&output_dir);
        args.push("--");
        args.push_path(target.interpreter);
        for flag in INTERPRETER_FLAGS {
            args.push(flag);
        }
        args.push_path(&source_file);

        Ok(args.0)
    }
}

impl IsolationBackend for BubblewrapBackend {
    fn capability(&self) -> SandboxCapability {
        SandboxCapability::LinuxNamespaces
    }

    fn name(&self) -> &'static str {
        "bubblewrap"
    }

    fn build_command(&self, target: &LaunchTarget<'_>) -> Result<ProcessSpec> {
        Ok(ProcessSpec {
            program: self.bwrap.clone(),
            args: self.bwrap_args(target)?,
            current_dir: target.output_dir.to_path_buf(),
            tmp_dir: PathBuf::from("/tmp"),
            launcher_forks: true,
            creation_flags: 0,
        })
    }
}

#[derive(Default)]
struct ArgList(Vec<OsString>);

impl ArgList {
    fn push(&mut self, arg: &str) -> &mut Self {
        self.0.push(OsString::from(arg));
        self
    }

    fn push_path(&mut self, path: &Path) -> &mut Self {
        self.0.push(path.as_os_str().to_owned());
        self
    }
}
