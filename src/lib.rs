//! # backlog-sync
//!
//! Declarative synchronisation of an epic → story backlog into a remote,
//! rate-limited task tracker. A desired state is described in TOML or JSON,
//! the remote collection is fetched page by page, and a minimal ordered plan
//! of creates, updates, moves, closes and deletes brings the remote in line.
//! Running the same desired state twice produces an empty second plan.
//!
//! ## Architecture Overview
//!
//! - **[`client`]**: one HTTP exchange at a time, with 429 and 5xx retry handling
//! - **[`remote`]**: typed REST surface and the paginated collection fetcher
//! - **[`tree`]**: the fetched forest, rebuilt from parent links and validated
//! - **[`desired`]**: the declared backlog, tiers and known duplicates
//! - **[`reconcile`]**: diffing desired against remote into a [`MutationPlan`]
//! - **[`executor`]**: sequential, paced replay of a plan with partial-failure reporting
//! - **[`sync`]**: the whole run, from fetch to verification
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backlog_sync::testing::InMemoryBacklog;
//! use backlog_sync::{BacklogSync, DesiredItem, DesiredState, SyncOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backlog = InMemoryBacklog::new("901");
//!     let sync = BacklogSync::new(backlog.api()?, SyncOptions::default());
//!
//!     let desired = DesiredState::new(vec![
//!         DesiredItem::new("Email Integration").with_child(DesiredItem::new("Inbox sync")),
//!     ]);
//!
//!     let report = sync.run(&desired).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

/// Rate-limited HTTP client.
///
/// A [`client::Transport`] performs a single attempt; [`client::RateLimitedClient`]
/// adds `Retry-After` handling, backoff with jitter and request statistics.
pub mod client;

/// Remote API types, endpoints and pagination.
pub mod remote;

/// Remote task forest.
pub mod tree;

/// Desired backlog state as loaded from disk.
pub mod desired;

/// Planning: remote tree + desired state → ordered mutation plan.
pub mod reconcile;

/// Plan execution.
pub mod executor;

/// End-to-end sync runs and their reports.
pub mod sync;

/// In-memory backlog service for tests.
pub mod testing;

/// Environment constants and path utilities.
///
/// Centralizes configuration file names, environment variable names and
/// API defaults used throughout the application.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use client::{AuthScheme, ClientConfig, ClientError, RateLimitBudget, RateLimitedClient, RetryPolicy};
pub use desired::{DesiredItem, DesiredState, DuplicateSet, ItemKey, Tier};
pub use executor::{CancelToken, ExecutionReport, ExecutorOptions, MutationExecutor};
pub use reconcile::{MutationPlan, Operation, OperationKind, ReconcileOptions, Reconciler, SpecError};
pub use remote::{BacklogApi, FetchError, FetchOptions, PaginatedFetcher, RemoteItem};
pub use sync::{BacklogSync, SyncError, SyncOptions, SyncReport};
pub use tree::{TaskTree, TreeError};
