//! CLI-specific functionality for backlog-sync
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{ApplyConfig, Args, ConnectionConfig, ExecutionMode, FetchConfig, PlanConfig};
pub use config::{ApiConfig, ConfigDiscovery, ConfigError, SyncConfig};
