/// Write-only debug copies of submitted sources
use crate::config::types::{Result, SandboxError};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Directory of `<sha256>.py` files. Writes are atomic: unique temp name,
/// fsync, rename.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            SandboxError::Workspace(format!(
                "Failed to create artifact dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, code_hash: &str) -> PathBuf {
        self.dir.join(format!("{}.py", code_hash))
    }

    pub fn persist(&self, code_hash: &str, source: &str) -> Result<PathBuf> {
        let final_path = self.path_for(code_hash);
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", code_hash, Uuid::new_v4()));

        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(source.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(SandboxError::Workspace(format!(
                "Failed to persist artifact {}: {}",
                final_path.display(),
                e
            )));
        }

        Ok(final_path)
    }
}
