//! Desired-vs-remote diffing.
//!
//! [`Reconciler::plan`] matches each [`crate::desired::DesiredItem`] against the
//! fetched [`crate::tree::TaskTree`] and emits a [`MutationPlan`] whose
//! operations can be replayed in list order.

pub mod plan;
pub mod reconciler;

pub use plan::{
    MutationPlan, Operation, OperationKind, OperationPayload, ParentRef, PlanCounts,
    PlanOrderError, RetainReason, RetainedItem,
};
pub use reconciler::{AUTO_CLOSED_MARKER, ReconcileOptions, Reconciler, SpecError};
