//! Safety and cleanup
//!
//! Run-scoped workspaces and source artifacts.

pub mod artifacts;
pub mod workspace;
