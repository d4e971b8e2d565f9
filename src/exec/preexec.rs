//! Resource ceilings applied in the child before exec
//!
//! The plan is computed in the parent: every ceiling is checked against the
//! host's current hard limit there, so the code that runs between fork and
//! exec only issues `setrlimit`/`prctl` calls and never allocates or logs.
use crate::config::policy::Policy;
use crate::config::types::{Result, SandboxError};

/// Ceilings requested by the policy for one spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCeilings {
    pub cpu_seconds: u64,
    pub address_space_bytes: u64,
    pub file_size_bytes: u64,
    pub max_processes: u64,
    /// False when the launcher must fork (bubblewrap); the PID namespace
    /// contains forks instead.
    pub limit_processes: bool,
    pub strict: bool,
}

impl ResourceCeilings {
    pub fn from_policy(policy: &Policy, limit_processes: bool) -> Self {
        Self {
            cpu_seconds: policy.cpu_seconds,
            address_space_bytes: policy.address_space_bytes,
            file_size_bytes: policy.file_size_bytes,
            max_processes: policy.max_processes,
            limit_processes,
            strict: policy.strict_limits,
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::*;

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type RlimitResource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type RlimitResource = libc::c_int;

    #[derive(Debug, Clone, Copy)]
    struct RlimitEntry {
        resource: RlimitResource,
        soft: libc::rlim_t,
        hard: libc::rlim_t,
    }

    /// Ceilings that the host will accept, ready to apply after fork.
    #[derive(Debug, Clone, Default)]
    pub struct LimitPlan {
        entries: Vec<RlimitEntry>,
        pub skipped: Vec<String>,
    }

    impl LimitPlan {
        pub fn prepare(ceilings: &ResourceCeilings) -> Result<Self> {
            let mut plan = LimitPlan::default();

            plan.add("RLIMIT_CPU", libc::RLIMIT_CPU, ceilings.cpu_seconds, ceilings.strict)?;
            plan.add("RLIMIT_AS", libc::RLIMIT_AS, ceilings.address_space_bytes, ceilings.strict)?;
            plan.add("RLIMIT_FSIZE", libc::RLIMIT_FSIZE, ceilings.file_size_bytes, ceilings.strict)?;
            plan.add("RLIMIT_CORE", libc::RLIMIT_CORE, 0, ceilings.strict)?;
            if ceilings.limit_processes {
                plan.add("RLIMIT_NPROC", libc::RLIMIT_NPROC, ceilings.max_processes, ceilings.strict)?;
            }

            Ok(plan)
        }

        fn add(
            &mut self,
            name: &str,
            resource: RlimitResource,
            value: u64,
            strict_mode: bool,
        ) -> Result<()> {
            let mut current = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            let rc = unsafe { libc::getrlimit(resource, &mut current) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                return self.refuse(name, value, &err.to_string(), strict_mode);
            }

            let wanted = value as libc::rlim_t;
            // Unprivileged processes may only lower a hard limit.
            if current.rlim_max != libc::RLIM_INFINITY && wanted > current.rlim_max {
                let reason = format!("host hard limit is {}", current.rlim_max);
                return self.refuse(name, value, &reason, strict_mode);
            }

            self.entries.push(RlimitEntry {
                resource,
                soft: wanted,
                hard: wanted,
            });
            Ok(())
        }

        fn refuse(&mut self, name: &str, value: u64, reason: &str, strict_mode: bool) -> Result<()> {
            if strict_mode {
                return Err(SandboxError::Process(format!(
                    "Cannot apply {}={}: {}",
                    name, value, reason
                )));
            }
            log::warn!(
                "Skipping {}={} in permissive mode: {}",
                name,
                value,
                reason
            );
            self.skipped.push(name.to_string());
            Ok(())
        }

        /// Apply the plan to the calling process.
        ///
        /// Async-signal-safe: runs between fork and exec.
        pub fn apply(&self) -> std::io::Result<()> {
            for entry in &self.entries {
                let limit = libc::rlimit {
                    rlim_cur: entry.soft,
                    rlim_max: entry.hard,
                };
                if unsafe { libc::setrlimit(entry.resource, &limit) } != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }

            #[cfg(target_os = "linux")]
            {
                if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) } != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }

            Ok(())
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::*;

    /// Resource ceilings are not available on this platform.
    #[derive(Debug, Clone, Default)]
    pub struct LimitPlan {
        pub skipped: Vec<String>,
    }

    impl LimitPlan {
        pub fn prepare(_ceilings: &ResourceCeilings) -> Result<Self> {
            Ok(LimitPlan::default())
        }

        pub fn apply(&self) -> std::io::Result<()> {
            Ok(())
        }

        pub fn len(&self) -> usize {
            0
        }

        pub fn is_empty(&self) -> bool {
            true
        }
    }
}

pub use imp::LimitPlan;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    #[test]
    fn ceilings_follow_policy() {
        let policy = Policy::builder().cpu_seconds(5).strict_limits(true).build();
        let ceilings = ResourceCeilings::from_policy(&policy, false);
        assert_eq!(ceilings.cpu_seconds, 5);
        assert!(ceilings.strict);
        assert!(!ceilings.limit_processes);
    }

    #[test]
    fn plan_skips_nproc_for_forking_launchers() {
        let policy = Policy::default();
        let with = LimitPlan::prepare(&ResourceCeilings::from_policy(&policy, true)).unwrap();
        let without = LimitPlan::prepare(&ResourceCeilings::from_policy(&policy, false)).unwrap();
        assert_eq!(with.len() + with.skipped.len(), 5);
        assert_eq!(without.len() + without.skipped.len(), 4);
    }

    #[test]
    fn ceilings_reach_the_child() {
        let policy = Policy::builder().cpu_seconds(17).build();
        let plan = LimitPlan::prepare(&ResourceCeilings::from_policy(&policy, false)).unwrap();
        if plan.skipped.iter().any(|name| name == "RLIMIT_CPU") {
            return;
        }

        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg("ulimit -t");
        unsafe {
            command.pre_exec(move || plan.apply());
        }
        let output = command.output().unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "17");
    }
}
