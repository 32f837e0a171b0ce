//! Replays a [`crate::reconcile::MutationPlan`] against the remote API.
//!
//! Operations run strictly one after another in plan order, with a fixed
//! pause between requests. A failed operation is recorded and the run moves
//! on; nothing already applied is rolled back.

pub mod cancel;
pub mod mutation;
pub mod report;

pub use cancel::CancelToken;
pub use mutation::{ExecutorOptions, MutationExecutor};
pub use report::{ExecutionReport, FailedOperation, OperationOutcome, OperationResult};
