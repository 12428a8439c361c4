//! Shared types and configuration for the jobstream workspace.
//!
//! Kept dependency-light so every other crate can depend on it without
//! pulling in the async runtime or the queue transport.

pub mod config;
pub mod types;
