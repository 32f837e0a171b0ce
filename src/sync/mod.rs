//! Top-level run: fetch → rebuild tree → reconcile → apply → verify.

pub mod report;
pub mod runner;

pub use report::{SyncReport, Verification};
pub use runner::{BacklogSync, SyncError, SyncOptions};
