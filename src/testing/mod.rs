//! In-memory stand-in for the remote backlog service.
//!
//! Used by this crate's tests and available to downstream crates that want
//! to exercise a sync run without network access.

pub mod backlog;

pub use backlog::{InMemoryBacklog, RecordedRequest, TEST_BASE_URL};
