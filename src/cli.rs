use crate::config::policy::Policy;
use crate::config::types::{ExecutorConfig, SandboxCapability};
use crate::config::validator::validate_policy;
use crate::exec::executor::{ExecutionRequest, Executor};
use crate::isolation::SandboxSelector;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Sandboxed execution of untrusted Python scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze and run a script, print the JSON report
    Execute {
        /// Source code as string
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,
        /// Read source from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Wall clock limit in seconds (policy default otherwise)
        #[arg(long)]
        timeout: Option<u64>,
        /// Pin PRNG seeds and the clock
        #[arg(long)]
        deterministic: bool,
        /// Per-stream output ceiling in bytes
        #[arg(long)]
        max_output: Option<usize>,
        /// Policy JSON file
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Interpreter path or name on PATH
        #[arg(long, default_value = "python3")]
        python: PathBuf,
        /// Force an isolation capability instead of probing
        #[arg(long)]
        capability: Option<SandboxCapability>,
        /// Parent directory for per-run workspaces
        #[arg(long)]
        work_root: Option<PathBuf>,
        /// Append audit events to this file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },
    /// Report the isolation capability of this host
    Probe,
    /// Validate a policy file
    CheckPolicy {
        /// Policy JSON file
        path: PathBuf,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Execute {
            code,
            file,
            timeout,
            deterministic,
            max_output,
            policy,
            python,
            capability,
            work_root,
            audit_log,
        } => {
            let source = match (code, file) {
                (Some(code), None) => code,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                _ => bail!("Exactly one of --code or --file is required"),
            };

            let policy = match policy {
                Some(path) => Policy::load_from_file(&path)?,
                None => Policy::default(),
            };

            let mut config = ExecutorConfig {
                interpreter: python,
                capability,
                audit_path: audit_log,
                ..ExecutorConfig::default()
            };
            if let Some(root) = work_root {
                config.work_root = root;
            }

            let executor = Executor::new(config, policy).context("Failed to initialize executor")?;
            if executor.reduced_isolation() {
                eprintln!(
                    "WARNING: reduced isolation ({}): containment relies on static analysis and the timeout",
                    executor.capability()
                );
            }

            let mut request = ExecutionRequest::new(source).deterministic(deterministic);
            if let Some(secs) = timeout {
                request = request.timeout(Duration::from_secs(secs));
            }
            if let Some(bytes) = max_output {
                request = request.max_output_bytes(bytes);
            }

            let report = executor.execute_request(&request);
            println!("{}", report.to_json()?);

            if !report.success || report.error_class.is_some() {
                std::process::exit(1);
            }
        }
        Commands::Probe => {
            let probe = SandboxSelector::probe();
            println!("capability: {}", probe.capability);
            if let Some(launcher) = &probe.launcher {
                println!("launcher: {}", launcher.display());
            }
            println!("reduced_isolation: {}", probe.capability.is_reduced());
        }
        Commands::CheckPolicy { path } => {
            let policy = Policy::load_from_file(&path)?;
            let validation = validate_policy(&policy);
            for warning in &validation.warnings {
                eprintln!("warning: {}", warning);
            }
            for error in &validation.errors {
                eprintln!("error: {}", error);
            }
            if !validation.is_valid() {
                std::process::exit(1);
            }
            println!("{}: ok", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn execute_arguments_parse() {
        let cli = Cli::try_parse_from([
            "scriptbox",
            "execute",
            "--code",
            "print(1)",
            "--timeout",
            "5",
            "--deterministic",
            "--capability",
            "none",
        ])
        .unwrap();
        match cli.command {
            Commands::Execute {
                code,
                timeout,
                deterministic,
                capability,
                ..
            } => {
                assert_eq!(code.as_deref(), Some("print(1)"));
                assert_eq!(timeout, Some(5));
                assert!(deterministic);
                assert_eq!(capability, Some(SandboxCapability::None));
            }
            _ => panic!("expected execute"),
        }
    }

    #[test]
    fn code_and_file_conflict() {
        let parsed = Cli::try_parse_from(["scriptbox", "execute", "--code", "x", "--file", "a.py"]);
        assert!(parsed.is_err());
    }
}
