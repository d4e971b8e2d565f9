//! Configuration and policy
//!
//! Policy definition, executor settings, and validation.

pub mod policy;
pub mod types;
pub mod validator;
