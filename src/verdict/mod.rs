//! Result classification
//!
//! Maps a finished run to an execution report as a pure function over the
//! runner's outcome.

pub mod classifier;
pub mod report;
