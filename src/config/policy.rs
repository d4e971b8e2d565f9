/// Execution policy: what a submitted script may import, call, and consume
use crate::config::types::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_ALLOWED_IMPORTS: &[&str] = &[
    "pvlib",
    "pandas",
    "numpy",
    "scipy",
    "matplotlib",
    "json",
    "math",
    "datetime",
    "pytz",
    "dateutil",
    "warnings",
    "random",
    "time",
];

const DEFAULT_FORBIDDEN_CALLABLES: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "vars",
    "globals",
    "locals",
    "dir",
    "open",
    "input",
    "breakpoint",
    "help",
    "copyright",
    "credits",
    "license",
];

const DEFAULT_ATTRIBUTE_FUNCTIONS: &[&str] = &["getattr", "setattr", "delattr", "hasattr"];

const DEFAULT_SAFE_DUNDERS: &[&str] = &["__name__", "__doc__", "__version__", "__file__"];

fn owned(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Immutable description of what a run is permitted to do.
///
/// Built once per executor and only ever borrowed afterwards. Sets are
/// ordered so diagnostics that list them are stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Top-level module names a script may import
    pub allowed_imports: BTreeSet<String>,
    /// Bare callee names rejected at any nesting depth
    pub forbidden_callables: BTreeSet<String>,
    /// Reflection helpers whose second argument must not name a dunder
    pub forbidden_attribute_functions: BTreeSet<String>,
    /// Dunder names tolerated as bare names and attributes
    pub safe_dunders: BTreeSet<String>,

    pub cpu_seconds: u64,
    pub address_space_bytes: u64,
    pub file_size_bytes: u64,
    pub max_processes: u64,
    /// Default wall-clock timeout when a request does not override it
    pub timeout_seconds: u64,
    /// Per-stream capture ceiling
    pub max_output_bytes: usize,

    /// Fail the spawn when the host refuses a ceiling instead of skipping it
    pub strict_limits: bool,
    /// Host environment variables forwarded into the child
    pub preserve_env: Vec<String>,
    /// Extra host paths bound read-only into the sandbox
    pub extra_readonly_paths: Vec<PathBuf>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allowed_imports: owned(DEFAULT_ALLOWED_IMPORTS),
            forbidden_callables: owned(DEFAULT_FORBIDDEN_CALLABLES),
            forbidden_attribute_functions: owned(DEFAULT_ATTRIBUTE_FUNCTIONS),
            safe_dunders: owned(DEFAULT_SAFE_DUNDERS),
            cpu_seconds: 30,
            address_space_bytes: 512 * 1024 * 1024,
            file_size_bytes: 10 * 1024 * 1024,
            max_processes: 1,
            timeout_seconds: 60,
            max_output_bytes: 1_000_000,
            strict_limits: false,
            preserve_env: Vec::new(),
            extra_readonly_paths: Vec::new(),
        }
    }
}

impl Policy {
    /// Load a policy from a JSON file. Missing fields keep their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read policy file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse policy JSON: {}", e)))
    }

    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn is_import_allowed(&self, root_module: &str) -> bool {
        self.allowed_imports.contains(root_module)
    }

    /// Dunder names outside the safe set.
    pub fn is_forbidden_dunder(&self, name: &str) -> bool {
        is_dunder(name) && !self.safe_dunders.contains(name)
    }

    /// Allowed imports as a comma separated, sorted list.
    pub fn allowed_imports_listing(&self) -> String {
        self.allowed_imports
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `__name__`-shaped identifiers.
pub fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Fluent construction of a [`Policy`] starting from the defaults.
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    pub fn allow_import(mut self, module: impl Into<String>) -> Self {
        self.policy.allowed_imports.insert(module.into());
        self
    }

    pub fn deny_import(mut self, module: &str) -> Self {
        self.policy.allowed_imports.remove(module);
        self
    }

    /// Replace the whole allow-list.
    pub fn allowed_imports<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.allowed_imports = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn forbid_callable(mut self, name: impl Into<String>) -> Self {
        self.policy.forbidden_callables.insert(name.into());
        self
    }

    pub fn safe_dunder(mut self, name: impl Into<String>) -> Self {
        self.policy.safe_dunders.insert(name.into());
        self
    }

    pub fn cpu_seconds(mut self, seconds: u64) -> Self {
        self.policy.cpu_seconds = seconds;
        self
    }

    pub fn address_space_bytes(mut self, bytes: u64) -> Self {
        self.policy.address_space_bytes = bytes;
        self
    }

    pub fn file_size_bytes(mut self, bytes: u64) -> Self {
        self.policy.file_size_bytes = bytes;
        self
    }

    pub fn max_processes(mut self, count: u64) -> Self {
        self.policy.max_processes = count;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.policy.timeout_seconds = seconds;
        self
    }

    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.policy.max_output_bytes = bytes;
        self
    }

    pub fn strict_limits(mut self, strict: bool) -> Self {
        self.policy.strict_limits = strict;
        self
    }

    pub fn preserve_env(mut self, name: impl Into<String>) -> Self {
        self.policy.preserve_env.push(name.into());
        self
    }

    pub fn extra_readonly_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy.extra_readonly_paths.push(path.into());
        self
    }

    pub fn build(self) -> Policy {
        self.policy
    }
}
