// Policy validation
// Executors refuse policies with errors; warnings are logged at construction.

use crate::config::policy::Policy;
use crate::config::types::{Result, SandboxError};

/// Modules that hand a script the host back if allow-listed.
const DANGEROUS_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "ctypes",
    "importlib",
    "builtins",
    "pickle",
    "multiprocessing",
    "threading",
    "pathlib",
    "io",
];

const MAX_SANE_TIMEOUT_SECS: u64 = 3600;
const MAX_SANE_ADDRESS_SPACE: u64 = 16 * 1024 * 1024 * 1024;
const MAX_SANE_OUTPUT: usize = 64 * 1024 * 1024;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into an error when anything fatal was found.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(SandboxError::Config(format!(
                "Policy validation failed:\n{}",
                self.errors.join("\n")
            )))
        }
    }
}

pub fn validate_policy(policy: &Policy) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_limits(policy, &mut result);
    validate_imports(policy, &mut result);
    validate_constructs(policy, &mut result);

    result
}

fn validate_limits(policy: &Policy, result: &mut ValidationResult) {
    if policy.timeout_seconds == 0 {
        result.add_error("timeout_seconds must be greater than 0".to_string());
    } else if policy.timeout_seconds > MAX_SANE_TIMEOUT_SECS {
        result.add_warning(format!(
            "timeout_seconds={} exceeds {}s",
            policy.timeout_seconds, MAX_SANE_TIMEOUT_SECS
        ));
    }

    if policy.max_output_bytes == 0 {
        result.add_error("max_output_bytes must be greater than 0".to_string());
    } else if policy.max_output_bytes > MAX_SANE_OUTPUT {
        result.add_warning(format!(
            "max_output_bytes={} exceeds {} bytes",
            policy.max_output_bytes, MAX_SANE_OUTPUT
        ));
    }

    if policy.cpu_seconds == 0 {
        result.add_error("cpu_seconds must be greater than 0".to_string());
    }

    if policy.address_space_bytes == 0 {
        result.add_error("address_space_bytes must be greater than 0".to_string());
    } else if policy.address_space_bytes > MAX_SANE_ADDRESS_SPACE {
        result.add_warning(format!(
            "address_space_bytes={} is above 16 GiB",
            policy.address_space_bytes
        ));
    }

    if policy.max_processes == 0 {
        result.add_error("max_processes must be at least 1".to_string());
    }

    if policy.cpu_seconds > policy.timeout_seconds && policy.timeout_seconds > 0 {
        result.add_warning(format!(
            "cpu_seconds={} is larger than timeout_seconds={}; wall clock fires first",
            policy.cpu_seconds, policy.timeout_seconds
        ));
    }

    for path in &policy.extra_readonly_paths {
        if !path.is_absolute() {
            result.add_error(format!(
                "extra_readonly_paths entry must be absolute: {}",
                path.display()
            ));
        } else if !path.exists() {
            result.add_warning(format!(
                "extra_readonly_paths entry does not exist: {}",
                path.display()
            ));
        }
    }
}

fn validate_imports(policy: &Policy, result: &mut ValidationResult) {
    if policy.allowed_imports.is_empty() {
        result.add_error("allowed_imports must not be empty".to_string());
    }

    for module in &policy.allowed_imports {
        if module.contains('.') {
            result.add_error(format!(
                "allowed_imports holds top-level names only, got {}",
                module
            ));
        }
        if DANGEROUS_MODULES.contains(&module.as_str()) {
            result.add_warning(format!(
                "allowed_imports contains {}, which exposes the host",
                module
            ));
        }
    }
}

fn validate_constructs(policy: &Policy, result: &mut ValidationResult) {
    for name in ["eval", "exec", "__import__", "open"] {
        if !policy.forbidden_callables.contains(name) {
            result.add_warning(format!("forbidden_callables does not include {}", name));
        }
    }

    for dunder in &policy.safe_dunders {
        if !crate::config::policy::is_dunder(dunder) {
            result.add_warning(format!("safe_dunders entry is not a dunder: {}", dunder));
        }
    }
}
