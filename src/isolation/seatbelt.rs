//! macOS sandbox-exec profiles
use crate::config::types::{Result, SandboxCapability};
use crate::isolation::{interpreter_roots, IsolationBackend, LaunchTarget, ProcessSpec, INTERPRETER_FLAGS};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const SYSTEM_READ_PATHS: &[&str] = &[
    "/System",
    "/Library",
    "/usr",
    "/dev",
    "/private/etc",
    "/private/var/db/timezone",
    "/private/var/select",
];

#[derive(Debug, Clone)]
pub struct SeatbeltBackend {
    sandbox_exec: PathBuf,
}

impl SeatbeltBackend {
    pub fn new(sandbox_exec: PathBuf) -> Self {
        Self { sandbox_exec }
    }

    pub fn detect() -> Option<Self> {
        which::which("sandbox-exec").ok().map(Self::new)
    }
}

/// SBPL string literal.
fn quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Deny-default profile for one run. Passed inline with `-p`, so
/// concurrent runs never share a profile file.
pub fn generate_profile(target: &LaunchTarget<'_>) -> String {
    let mut profile = String::with_capacity(2048);

    profile.push_str("(version 1)\n");
    profile.push_str("(deny default)\n");

    profile.push_str("(allow file-read-metadata)\n");
    profile.push_str("(allow sysctl-read)\n");
    profile.push_str("(allow signal (target self))\n");
    profile.push_str("(allow file-read* (literal \"/\")\n");
    for path in SYSTEM_READ_PATHS {
        profile.push_str(&format!("  (subpath {})\n", quote(Path::new(path))));
    }
    profile.push_str(")\n");

    let mut exec_literals = vec![target.interpreter.to_path_buf()];
    if let Ok(canonical) = std::fs::canonicalize(target.interpreter) {
        if canonical != target.interpreter {
            exec_literals.push(canonical);
        }
    }
    profile.push_str("(allow process-exec");
    for path in &exec_literals {
        profile.push_str(&format!(" (literal {})", quote(path)));
    }
    profile.push_str(")\n");

    let mut readonly = interpreter_roots(target.interpreter);
    readonly.extend(target.extra_readonly_paths.iter().cloned());
    for path in &readonly {
        profile.push_str(&format!("(allow file-read* file-map-executable (subpath {}))\n", quote(path)));
    }

    profile.push_str(&format!(
        "(allow file-read* (literal {}))\n",
        quote(target.source_file)
    ));
    // The run directory is the only writable place. The kernel matches
    // resolved paths, so /var/folders also appears as /private/var/folders.
    let mut writable = vec![target.output_dir.to_path_buf()];
    if let Ok(canonical) = std::fs::canonicalize(target.output_dir) {
        if canonical != target.output_dir {
            writable.push(canonical);
        }
    }
    for path in &writable {
        profile.push_str(&format!("(allow file-read* file-write* (subpath {}))\n", quote(path)));
    }
    profile.push_str("(allow file-write-data (literal \"/dev/null\"))\n");
    profile.push_str("(deny network*)\n");

    profile
}

impl IsolationBackend for SeatbeltBackend {
    fn capability(&self) -> SandboxCapability {
        SandboxCapability::MacosProfile
    }

    fn name(&self) -> &'static str {
        "sandbox-exec"
    }

    fn build_command(&self, target: &LaunchTarget<'_>) -> Result<ProcessSpec> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(generate_profile(target)),
            target.interpreter.as_os_str().to_owned(),
        ];
        args.extend(INTERPRETER_FLAGS.iter().map(OsString::from));
        args.push(target.source_file.as_os_str().to_owned());

        Ok(ProcessSpec {
            program: self.sandbox_exec.clone(),
            args,
            current_dir: target.output_dir.to_path_buf(),
            tmp_dir: target.output_dir.to_path_buf(),
            launcher_forks: false,
            creation_flags: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target<'a>(extra: &'a [PathBuf]) -> LaunchTarget<'a> {
        LaunchTarget {
            interpreter: Path::new("/opt/homebrew/bin/python3"),
            source_file: Path::new("/private/tmp/run/main.py"),
            output_dir: Path::new("/private/tmp/run"),
            extra_readonly_paths: extra,
        }
    }

    #[test]
    fn profile_denies_by_default_and_blocks_network() {
        let profile = generate_profile(&target(&[]));
        assert!(profile.starts_with("(version 1)\n(deny default)\n"));
        assert!(profile.contains("(deny network*)"));
        assert!(profile.contains("(allow process-exec (literal \"/opt/homebrew/bin/python3\")"));
        assert!(profile.contains("(allow file-read* (literal \"/private/tmp/run/main.py\"))"));
        assert!(profile.contains("(allow file-read* file-write* (subpath \"/private/tmp/run\"))"));
        assert!(profile.contains("(subpath \"/opt/homebrew\")"));
    }

    #[test]
    fn only_the_run_directory_is_writable() {
        let profile = generate_profile(&target(&[]));
        let writes: Vec<_> = profile.lines().filter(|line| line.contains("file-write")).collect();
        assert_eq!(
            writes,
            vec![
                "(allow file-read* file-write* (subpath \"/private/tmp/run\"))",
                "(allow file-write-data (literal \"/dev/null\"))",
            ]
        );
        assert!(!profile.contains("(subpath \"/private/tmp\")"));
        assert!(!profile.contains("(subpath \"/private/var/folders\")"));
        assert!(!profile.contains("(subpath \"/private/var\")"));
        assert!(profile.contains("(subpath \"/private/var/db/timezone\")"));
    }

    #[test]
    fn extra_paths_are_readable() {
        let extra = vec![PathBuf::from("/Users/me/site-packages")];
        let profile = generate_profile(&target(&extra));
        assert!(profile.contains("(subpath \"/Users/me/site-packages\")"));
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote(Path::new("/tmp/a\"b")), "\"/tmp/a\\\"b\"");
    }

    #[test]
    fn profile_passed_inline() {
        let backend = SeatbeltBackend::new(PathBuf::from("/usr/bin/sandbox-exec"));
        let spec = backend.build_command(&target(&[])).unwrap();
        assert_eq!(spec.args[0], "-p");
        assert!(spec.args[1].to_string_lossy().contains("(deny default)"));
        assert_eq!(spec.args[2], "/opt/homebrew/bin/python3");
        assert_eq!(spec.args.last().unwrap(), "/private/tmp/run/main.py");
    }
}
