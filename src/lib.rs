//! Sweep: watch a deposit address and forward confirmed deposits to a vault
//!
//! - `infrastructure` - chain client trait and its Alloy implementation
//! - `core` - watcher, withdrawer and retry policy
//! - `config` - startup configuration

pub mod config;
pub mod core;
pub mod infrastructure;
