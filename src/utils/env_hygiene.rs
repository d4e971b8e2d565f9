/// Environment hygiene for the interpreter child
///
/// The child never inherits the host environment wholesale: it gets a
/// fixed baseline plus the variables the policy explicitly forwards.
use crate::config::policy::Policy;
use std::collections::BTreeMap;
use std::path::Path;

/// Loader and interpreter variables that are never forwarded, even when a
/// policy asks for them.
const BLOCKED_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PYTHONPATH",
    "PYTHONHOME",
    "PYTHONSTARTUP",
    "PYTHONINSPECT",
    "PYTHONBREAKPOINT",
];

#[cfg(unix)]
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
#[cfg(windows)]
const DEFAULT_PATH: &str = r"C:\Windows\System32;C:\Windows";

/// Sanitized environment for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildEnvironment {
    vars: BTreeMap<String, String>,
}

impl ChildEnvironment {
    /// Baseline environment. `tmp_dir` is the temp directory as seen from
    /// inside the sandbox.
    pub fn build(policy: &Policy, tmp_dir: &Path, deterministic: bool) -> Self {
        let mut vars = BTreeMap::new();

        vars.insert("PATH".to_string(), DEFAULT_PATH.to_string());
        vars.insert("HOME".to_string(), tmp_dir.display().to_string());
        vars.insert("TMPDIR".to_string(), tmp_dir.display().to_string());
        vars.insert("LANG".to_string(), "C.UTF-8".to_string());
        vars.insert("LC_ALL".to_string(), "C.UTF-8".to_string());
        vars.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());
        vars.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string());
        vars.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        vars.insert("MPLBACKEND".to_string(), "Agg".to_string());

        #[cfg(windows)]
        if let Ok(root) = std::env::var("SYSTEMROOT") {
            vars.insert("SYSTEMROOT".to_string(), root);
        }

        if deterministic {
            vars.insert("PYTHONHASHSEED".to_string(), "0".to_string());
        }

        for name in &policy.preserve_env {
            if BLOCKED_VARS.contains(&name.as_str()) {
                log::warn!("Refusing to forward blocked environment variable: {}", name);
                continue;
            }
            if let Ok(value) = std::env::var(name) {
                vars.insert(name.clone(), value);
            }
        }

        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_is_fixed() {
        let env = ChildEnvironment::build(&Policy::default(), Path::new("/tmp"), false);
        assert_eq!(env.get("TMPDIR"), Some("/tmp"));
        assert_eq!(env.get("PYTHONDONTWRITEBYTECODE"), Some("1"));
        assert_eq!(env.get("PYTHONHASHSEED"), None);
        assert_eq!(env.get("LD_PRELOAD"), None);
    }

    #[test]
    fn determinism_pins_hash_seed() {
        let env = ChildEnvironment::build(&Policy::default(), Path::new("/tmp"), true);
        assert_eq!(env.get("PYTHONHASHSEED"), Some("0"));
    }

    #[test]
    fn preserve_env_forwards_but_blocks_loader_vars() {
        std::env::set_var("SCRIPTBOX_TEST_FORWARDED", "yes");
        std::env::set_var("PYTHONSTARTUP", "/tmp/evil.py");
        let policy = Policy::builder()
            .preserve_env("SCRIPTBOX_TEST_FORWARDED")
            .preserve_env("PYTHONSTARTUP")
            .build();

        let env = ChildEnvironment::build(&policy, Path::new("/tmp"), false);
        assert_eq!(env.get("SCRIPTBOX_TEST_FORWARDED"), Some("yes"));
        assert_eq!(env.get("PYTHONSTARTUP"), None);
    }
}
