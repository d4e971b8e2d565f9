use crate::analysis::{self, AnalysisFailure, AnalysisVerdict};
use crate::config::policy::Policy;
use crate::config::types::{ErrorClass, ExecutorConfig, Result, SandboxCapability, SandboxError};
use crate::config::validator::validate_policy;
use crate::exec::determinism::{self, WrappedSource};
use crate::exec::preexec::ResourceCeilings;
use crate::exec::runner::Runner;
/// Execution orchestration: analysis, wrapping, isolation, run, verdict
use crate::isolation::{IsolationBackend, LaunchTarget, SandboxSelector};
use crate::observability::audit::{events, AuditLog, CorrelationIds, SecurityEvent, SecurityEventType};
use crate::safety::artifacts::ArtifactStore;
use crate::safety::workspace::{content_hash, WorkspaceManager};
use crate::utils::env_hygiene::ChildEnvironment;
use crate::verdict::classifier::{ClassifyContext, ResultClassifier};
use crate::verdict::report::ExecutionReport;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One submission. Unset overrides fall back to the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub source: String,
    pub timeout: Option<Duration>,
    pub enforce_determinism: bool,
    pub max_output_bytes: Option<usize>,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timeout: None,
            enforce_determinism: false,
            max_output_bytes: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn deterministic(mut self, enforce: bool) -> Self {
        self.enforce_determinism = enforce;
        self
    }

    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }
}

/// Sandboxed Python executor.
///
/// The isolation backend is chosen once at construction and fixed for the
/// executor's lifetime. `execute` never fails: every outcome, including
/// infrastructure trouble after preflight, comes back as a report.
#[derive(Debug)]
pub struct Executor {
    config: ExecutorConfig,
    policy: Policy,
    interpreter: PathBuf,
    backend: Arc<dyn IsolationBackend>,
    runner: Runner,
    workspaces: WorkspaceManager,
    artifacts: Option<ArtifactStore>,
    audit: AuditLog,
    spawned: AtomicU64,
}

impl Executor {
    pub fn new(config: ExecutorConfig, policy: Policy) -> Result<Self> {
        let validation = validate_policy(&policy);
        for warning in validation.into_result()? {
            warn!("Policy warning: {}", warning);
        }

        let interpreter = resolve_interpreter(&config.interpreter)?;
        debug!("Using interpreter {}", interpreter.display());

        let backend = match config.capability {
            Some(capability) => SandboxSelector::for_capability(capability)?,
            None => SandboxSelector::select(),
        };

        let audit = AuditLog::open(config.audit_path.clone())?;
        audit.record(
            SecurityEvent::new(
                SecurityEventType::CapabilityDecision,
                format!("isolation backend {}", backend.name()),
            )
            .with_isolation(backend.capability()),
        );
        if backend.reduced_isolation() {
            audit.record(events::control_degraded(backend.capability()));
        }

        let workspaces = WorkspaceManager::new(config.work_root.clone())?;
        let artifacts = config
            .artifact_dir
            .clone()
            .map(ArtifactStore::new)
            .transpose()?;
        let runner = Runner::new(ResourceCeilings::from_policy(&policy, true));

        Ok(Self {
            config,
            policy,
            interpreter,
            backend,
            runner,
            workspaces,
            artifacts,
            audit,
            spawned: AtomicU64::new(0),
        })
    }

    pub fn capability(&self) -> SandboxCapability {
        self.backend.capability()
    }

    pub fn reduced_isolation(&self) -> bool {
        self.backend.reduced_isolation()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Interpreter processes started so far.
    pub fn spawned_processes(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Static analysis only, nothing is spawned.
    pub fn analyze(&self, source: &str) -> Result<AnalysisVerdict> {
        analysis::analyze(source, &self.policy)
    }

    pub fn execute(
        &self,
        source: &str,
        timeout_seconds: Option<u64>,
        enforce_determinism: bool,
        max_output_bytes: Option<usize>,
    ) -> ExecutionReport {
        let mut request = ExecutionRequest::new(source).deterministic(enforce_determinism);
        request.timeout = timeout_seconds.map(Duration::from_secs);
        request.max_output_bytes = max_output_bytes;
        self.execute_request(&request)
    }

    pub fn execute_request(&self, request: &ExecutionRequest) -> ExecutionReport {
        let code_hash = content_hash(&request.source);
        let ids = CorrelationIds::new(&code_hash);
        let isolation = self.capability();

        if let Some(store) = &self.artifacts {
            if let Err(e) = store.persist(&code_hash, &request.source) {
                warn!("Could not persist source artifact: {}", e);
            }
        }

        // Analysis and the workspace both see the canonical text.
        let canonical = match analysis::source::canonicalize(&request.source) {
            Ok(canonical) => canonical,
            Err(failure) => return self.reject_preflight(failure, &ids, code_hash),
        };

        let verdict = match analysis::analyze_canonical(&canonical, &self.policy) {
            Ok(verdict) => verdict,
            Err(e) => {
                self.audit.record(events::infrastructure_failure(&ids, &e.to_string()));
                return ExecutionReport::rejected(ErrorClass::Unknown, e.to_string(), false, isolation, code_hash);
            }
        };

        if let AnalysisVerdict::Fail(failure) = verdict {
            return self.reject_preflight(failure, &ids, code_hash);
        }

        match self.run_checked(request, &canonical, &code_hash, ids.clone()) {
            Ok(report) => report,
            Err(e) => {
                self.audit.record(events::infrastructure_failure(&ids, &e.to_string()));
                ExecutionReport::rejected(ErrorClass::Unknown, e.to_string(), false, isolation, code_hash)
            }
        }
    }

    fn reject_preflight(&self, failure: AnalysisFailure, ids: &CorrelationIds, code_hash: String) -> ExecutionReport {
        self.audit.record(events::preflight_rejected(ids, &failure.message));
        ExecutionReport::rejected(failure.error_class(), failure.report_message(), true, self.capability(), code_hash)
    }

    fn run_checked(
        &self,
        request: &ExecutionRequest,
        source: &str,
        code_hash: &str,
        ids: CorrelationIds,
    ) -> Result<ExecutionReport> {
        let timeout = request.timeout.unwrap_or_else(|| self.policy.timeout());
        if timeout.is_zero() {
            return Err(SandboxError::Config("Timeout must be positive".to_string()));
        }
        let max_output_bytes = request.max_output_bytes.unwrap_or(self.policy.max_output_bytes);
        if max_output_bytes == 0 {
            return Err(SandboxError::Config("Output ceiling must be positive".to_string()));
        }

        let wrapped = if request.enforce_determinism {
            determinism::wrap(source, self.config.determinism_seed, self.config.fixed_time)
        } else {
            WrappedSource::unwrapped(source)
        };

        let mut workspace = self.workspaces.create(&wrapped.source, code_hash)?;
        let mut ids = ids.with_run_id(workspace.run_id());

        let target = LaunchTarget {
            interpreter: &self.interpreter,
            source_file: workspace.source_file(),
            output_dir: workspace.run_dir(),
            extra_readonly_paths: &self.policy.extra_readonly_paths,
        };
        let spec = self.backend.build_command(&target)?;
        let env = ChildEnvironment::build(&self.policy, &spec.tmp_dir, request.enforce_determinism);

        self.audit.record(events::execution_start(&ids, self.capability()));
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let run = self.runner.run(&spec, &env, timeout, max_output_bytes);

        if let Err(e) = workspace.cleanup() {
            self.audit.record(events::cleanup_failure(&ids, &e.to_string()));
        }

        let outcome = run.map_err(|e| SandboxError::Process(e.to_string()))?;
        ids = ids.with_root_pid(outcome.root_pid);

        if !outcome.skipped_limits.is_empty() {
            self.audit.record(events::limit_skipped(&ids, &outcome.skipped_limits));
        }
        if outcome.timed_out {
            self.audit.record(events::timeout_kill(&ids, timeout.as_secs_f64()));
        }
        if outcome.stdout.truncated() {
            self.audit.record(events::output_truncated(&ids, "stdout", outcome.stdout.total_bytes, max_output_bytes));
        }
        if outcome.stderr.truncated() {
            self.audit.record(events::output_truncated(&ids, "stderr", outcome.stderr.total_bytes, max_output_bytes));
        }

        let report = ResultClassifier::classify(
            &outcome,
            &ClassifyContext {
                timeout,
                prelude_start: wrapped.prelude_start,
                prelude_lines: wrapped.prelude_lines,
                isolation: self.capability(),
                code_hash: code_hash.to_string(),
            },
        );

        self.audit.record(events::execution_end(
            &ids,
            format!(
                "success={} class={} exit={:?} {}ms",
                report.success,
                report.error_class.map_or("none", |c| c.as_str()),
                report.exit_code,
                report.duration_ms
            ),
        ));
        Ok(report)
    }
}

/// Absolute paths must exist; bare names are looked up on `PATH`.
fn resolve_interpreter(interpreter: &Path) -> Result<PathBuf> {
    if interpreter.is_absolute() {
        if interpreter.is_file() {
            return Ok(interpreter.to_path_buf());
        }
        return Err(SandboxError::InterpreterNotFound(interpreter.display().to_string()));
    }

    which::which(interpreter)
        .map_err(|e| SandboxError::InterpreterNotFound(format!("{}: {}", interpreter.display(), e)))
}
