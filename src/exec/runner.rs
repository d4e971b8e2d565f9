//! Process runner
//!
//! Spawns one [`ProcessSpec`], enforces the wall-clock timeout and kills the
//! whole process group when it fires, and captures bounded output.
use crate::exec::preexec::{LimitPlan, ResourceCeilings};
use crate::isolation::ProcessSpec;
use crate::utils::env_hygiene::ChildEnvironment;
use crate::utils::output::{CapturedStream, StreamCollector, COLLECTION_GRACE};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use wait_timeout::ChildExt;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to prepare resource ceilings: {0}")]
    Limits(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] std::io::Error),
}

/// How the child ended and what it wrote.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    /// Terminating signal, POSIX only
    pub signal: Option<i32>,
    /// The runner killed the child for exceeding the wall clock
    pub timed_out: bool,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    pub duration: Duration,
    pub root_pid: u32,
    /// Ceilings the host refused and that were skipped
    pub skipped_limits: Vec<String>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Spawns children with the configured ceilings.
#[derive(Debug, Clone)]
pub struct Runner {
    ceilings: ResourceCeilings,
}

impl Runner {
    pub fn new(ceilings: ResourceCeilings) -> Self {
        Self { ceilings }
    }

    pub fn ceilings(&self) -> &ResourceCeilings {
        &self.ceilings
    }

    /// Run to completion or timeout. A timeout is an outcome, not an error.
    pub fn run(
        &self,
        spec: &ProcessSpec,
        env: &ChildEnvironment,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<RunOutcome, RunError> {
        let mut ceilings = self.ceilings;
        ceilings.limit_processes &= !spec.launcher_forks;
        let plan = LimitPlan::prepare(&ceilings).map_err(|e| RunError::Limits(e.to_string()))?;
        let skipped_limits = plan.skipped.clone();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.current_dir)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        configure_platform(&mut command, spec, plan);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let root_pid = child.id();
        log::debug!("Spawned {} as pid {}", spec.program.display(), root_pid);

        let stdout = StreamCollector::spawn(child.stdout.take(), max_output_bytes);
        let stderr = StreamCollector::spawn(child.stderr.take(), max_output_bytes);

        let (status, timed_out) = match child.wait_timeout(timeout) {
            Ok(Some(status)) => (status, false),
            Ok(None) => {
                log::debug!("pid {} exceeded {:?}, killing process tree", root_pid, timeout);
                kill_process_tree(&mut child);
                let status = child.wait().map_err(RunError::Wait)?;
                (status, true)
            }
            Err(e) => {
                kill_process_tree(&mut child);
                let _ = child.wait();
                return Err(RunError::Wait(e));
            }
        };
        let duration = started.elapsed();

        let deadline = Instant::now() + COLLECTION_GRACE;
        let stdout = stdout.finish(deadline);
        let stderr = stderr.finish(deadline);

        Ok(RunOutcome {
            exit_code: status.code(),
            signal: exit_signal(&status),
            timed_out,
            stdout,
            stderr,
            duration,
            root_pid,
            skipped_limits,
        })
    }
}

#[cfg(unix)]
fn configure_platform(command: &mut Command, _spec: &ProcessSpec, plan: LimitPlan) {
    use std::os::unix::process::CommandExt;

    command.process_group(0);
    unsafe {
        command.pre_exec(move || plan.apply());
    }
}

#[cfg(windows)]
fn configure_platform(command: &mut Command, spec: &ProcessSpec, _plan: LimitPlan) {
    use std::os::windows::process::CommandExt;

    command.creation_flags(spec.creation_flags);
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// SIGKILL the child's process group. The child is not yet reaped, so its
/// pid still names the group.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        log::debug!("killpg({}) failed: {}", pgid, e);
    }
    let _ = child.kill();
}

#[cfg(windows)]
fn kill_process_tree(child: &mut Child) {
    let pid = child.id().to_string();
    let result = Command::new("taskkill")
        .args(["/T", "/F", "/PID", pid.as_str()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        log::debug!("taskkill for pid {} failed: {}", pid, e);
    }
    let _ = child.kill();
}
