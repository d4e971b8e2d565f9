//! Execution control
//!
//! Wraps, launches and supervises one interpreter run per request.

pub mod determinism;
pub mod executor;
pub mod preexec;
pub mod runner;
