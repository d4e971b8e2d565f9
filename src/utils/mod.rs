//! Utilities
//!
//! Environment hygiene and bounded output collection.

pub mod env_hygiene;
pub mod output;
