use crate::client::RequestStatistics;
use crate::executor::{ExecutionReport, FailedOperation};
use crate::reconcile::{PlanCounts, RetainedItem};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of the re-fetch that follows an apply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub fetched: usize,
    /// Operations a fresh reconciliation still wants
    pub remaining: PlanCounts,
    pub converged: bool,
    /// Set when the re-fetch or re-plan itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Verification {
    /// Convergence could not be checked; counts as not converged
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            fetched: 0,
            remaining: PlanCounts::default(),
            converged: false,
            error: Some(error.into()),
        }
    }
}

/// Structured result of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collection_id: String,
    pub dry_run: bool,
    pub fetched: usize,
    pub planned: PlanCounts,
    pub retained: Vec<RetainedItem>,
    pub applied_ok: usize,
    pub applied_failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    pub cancelled: bool,
    /// Ids (or `new:<name>` for creates) of failed and skipped operations
    pub failed_ids: Vec<String>,
    pub failures: Vec<FailedOperation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    pub requests: RequestStatistics,
}

impl SyncReport {
    pub(crate) fn new(run_id: Uuid, started_at: DateTime<Utc>, collection_id: &str) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            collection_id: collection_id.to_string(),
            dry_run: false,
            fetched: 0,
            planned: PlanCounts::default(),
            retained: Vec::new(),
            applied_ok: 0,
            applied_failed: 0,
            skipped: 0,
            not_attempted: 0,
            cancelled: false,
            failed_ids: Vec::new(),
            failures: Vec::new(),
            verification: None,
            requests: RequestStatistics::default(),
        }
    }

    pub(crate) fn absorb(&mut self, execution: &ExecutionReport) {
        self.applied_ok = execution.succeeded;
        self.applied_failed = execution.failed;
        self.skipped = execution.skipped;
        self.not_attempted = execution.not_attempted;
        self.cancelled = execution.cancelled;
        self.failed_ids = execution.failed_identifiers();
        self.failures = execution.failures();
    }

    /// Never true while anything failed, was skipped, or the remote did not converge
    pub fn is_success(&self) -> bool {
        self.applied_failed == 0
            && self.skipped == 0
            && !self.cancelled
            && self.verification.as_ref().is_none_or(|v| v.converged)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "fetched {}, planned {} create / {} update / {} move / {} close / {} delete",
            self.fetched,
            self.planned.creates,
            self.planned.updates,
            self.planned.moves,
            self.planned.closes,
            self.planned.deletes
        );
        if self.dry_run {
            summary.push_str(" (dry run)");
        } else {
            summary.push_str(&format!(
                "; applied {} ok, {} failed, {} skipped",
                self.applied_ok, self.applied_failed, self.skipped
            ));
        }
        if self.cancelled {
            summary.push_str(&format!("; cancelled, {} not attempted", self.not_attempted));
        }
        if let Some(verification) = &self.verification {
            if let Some(error) = &verification.error {
                summary.push_str(&format!("; verification failed: {}", error));
            } else if verification.converged {
                summary.push_str("; verified converged");
            } else {
                summary.push_str(&format!(
                    "; NOT converged, {} operations remain",
                    verification.remaining.total()
                ));
            }
        }
        summary
    }
}
