/// Run-scoped workspaces
///
/// Every run gets `<work_root>/<hash-prefix>-<uuid>/main.py`. The sha256
/// prefix groups identical submissions, the uuid keeps concurrent runs of
/// the same source apart.
use crate::config::types::{Result, SandboxError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SOURCE_FILE_NAME: &str = "main.py";
const HASH_PREFIX_LEN: usize = 16;

/// Hex sha256 of the submitted source.
pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Creates per-run directories under a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| {
            SandboxError::Workspace(format!(
                "Failed to create work root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// New run directory holding `source` as `main.py`.
    pub fn create(&self, source: &str, code_hash: &str) -> Result<Workspace> {
        let run_id = Uuid::new_v4().to_string();
        let prefix = &code_hash[..HASH_PREFIX_LEN.min(code_hash.len())];
        let run_dir = self.root.join(format!("{}-{}", prefix, run_id));

        fs::create_dir(&run_dir).map_err(|e| {
            SandboxError::Workspace(format!(
                "Failed to create workspace directory {}: {}",
                run_dir.display(),
                e
            ))
        })?;

        // From here on the guard owns the directory.
        let workspace = Workspace {
            run_id,
            source_file: run_dir.join(SOURCE_FILE_NAME),
            run_dir,
            cleaned: false,
        };

        restrict_permissions(&workspace.run_dir)?;
        fs::write(&workspace.source_file, source).map_err(|e| {
            SandboxError::Workspace(format!(
                "Failed to write source file {}: {}",
                workspace.source_file.display(),
                e
            ))
        })?;

        Ok(workspace)
    }
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
        SandboxError::Workspace(format!(
            "Failed to restrict permissions on {}: {}",
            dir.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

/// One run's directory. Removed by [`Workspace::cleanup`], or on drop if
/// the caller never got that far.
#[derive(Debug)]
pub struct Workspace {
    run_id: String,
    run_dir: PathBuf,
    source_file: PathBuf,
    cleaned: bool,
}

impl Workspace {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Remove the run directory (idempotent).
    pub fn cleanup(&mut self) -> Result<()> {
        if self.cleaned {
            return Ok(());
        }
        match fs::remove_dir_all(&self.run_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SandboxError::Workspace(format!(
                    "Failed to remove workspace {}: {}",
                    self.run_dir.display(),
                    e
                )))
            }
        }
        self.cleaned = true;
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!("{}", e);
        }
    }
}
