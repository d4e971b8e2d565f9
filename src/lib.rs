//! scriptbox: sandboxed execution of untrusted, machine-generated Python
//!
//! Source text goes in, a structured [`ExecutionReport`] comes out. Nothing
//! is spawned until static analysis passes, and every run happens inside the
//! strongest isolation primitive the host offers.
//!
//! # Architecture
//!
//! ## Configuration & Policy ([`config`])
//! - [`config::policy`]: What a script may import and call, resource ceilings
//! - [`config::validator`]: Policy sanity checks
//! - [`config::types`]: Error taxonomy, capabilities, executor settings
//!
//! ## Static Analysis ([`analysis`])
//! - [`analysis::syntax`]: tree-sitter parse and syntax errors
//! - [`analysis::imports`]: Import allow-list
//! - [`analysis::constructs`]: Introspection and dynamic-evaluation constructs
//!
//! ## Execution Control ([`exec`])
//! - [`exec::executor`]: Request orchestration
//! - [`exec::determinism`]: Seed and clock pinning prelude
//! - [`exec::preexec`]: rlimits applied between fork and exec
//! - [`exec::runner`]: Spawn, wall-clock timeout, process-group kill
//!
//! ## Isolation ([`isolation`])
//! - [`isolation::bubblewrap`]: Linux namespaces
//! - [`isolation::seatbelt`]: macOS sandbox profiles
//! - [`isolation::windows`]: Restricted Windows launch
//! - [`isolation::bare`]: No OS sandbox
//! - [`isolation::selector`]: Host probe and backend choice
//!
//! ## Evidence & Verdict ([`verdict`])
//! - [`verdict::classifier`]: Payload extraction and failure taxonomy
//! - [`verdict::report`]: Wire-level report
//!
//! ## Safety ([`safety`])
//! - [`safety::workspace`]: Run-scoped directories with guaranteed removal
//! - [`safety::artifacts`]: Content-addressed debug copies of sources
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//!
//! ## Utilities ([`utils`])
//! - [`utils::env_hygiene`]: Child environment construction
//! - [`utils::output`]: Bounded output collection

// Configuration & Policy
pub mod config;

// Static Analysis
pub mod analysis;

// Execution Control
pub mod exec;

// Isolation
pub mod isolation;

// Evidence & Verdict
pub mod verdict;

// Safety
pub mod safety;

// Observability
pub mod observability;

// Utilities
pub mod utils;

// API card cache for code-generating callers
pub mod introspect;

// CLI entrypoint for the scriptbox binary
pub mod cli;

pub use analysis::{analyze, AnalysisVerdict};
pub use config::policy::Policy;
pub use config::types::{ErrorClass, ExecutorConfig, Result, SandboxCapability, SandboxError};
pub use exec::executor::{ExecutionRequest, Executor};
pub use verdict::report::ExecutionReport;
