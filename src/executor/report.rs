use crate::reconcile::OperationKind;
use crate::remote::types::ItemId;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Applied; `id` is the item acted on, or the new id for a create
    Applied { id: ItemId },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
    /// Not dispatched because a prerequisite create did not happen
    Skipped { reason: String },
    /// Not dispatched because the run was cancelled first
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub index: usize,
    pub kind: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ItemId>,
    pub name: String,
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

impl OperationResult {
    /// Remote id when known, else the item name
    pub fn identifier(&self) -> String {
        match (&self.target, &self.outcome) {
            (Some(target), _) => target.clone(),
            (None, OperationOutcome::Applied { id }) => id.clone(),
            (None, _) => format!("new:{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedOperation {
    pub index: usize,
    pub kind: OperationKind,
    pub identifier: String,
    pub name: String,
    pub error: String,
}

/// Tally of one plan replay. Partial application is always visible here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    pub cancelled: bool,
    pub results: Vec<OperationResult>,
    /// Plan index of each applied create → the id the server minted
    pub created: BTreeMap<usize, ItemId>,
}

impl ExecutionReport {
    pub(crate) fn record(&mut self, result: OperationResult) {
        match &result.outcome {
            OperationOutcome::Applied { id } => {
                self.succeeded += 1;
                if result.kind == OperationKind::Create {
                    self.created.insert(result.index, id.clone());
                }
            }
            OperationOutcome::Failed { .. } => self.failed += 1,
            OperationOutcome::Skipped { .. } => self.skipped += 1,
            OperationOutcome::NotAttempted => self.not_attempted += 1,
        }
        self.results.push(result);
    }

    /// Every operation ran and none failed or was skipped
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && !self.cancelled
    }

    pub fn failures(&self) -> Vec<FailedOperation> {
        self.results
            .iter()
            .filter_map(|result| match &result.outcome {
                OperationOutcome::Failed { error, .. } => Some(FailedOperation {
                    index: result.index,
                    kind: result.kind,
                    identifier: result.identifier(),
                    name: result.name.clone(),
                    error: error.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Identifiers of failed and skipped items, in plan order
    pub fn failed_identifiers(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|result| {
                matches!(
                    result.outcome,
                    OperationOutcome::Failed { .. } | OperationOutcome::Skipped { .. }
                )
            })
            .map(OperationResult::identifier)
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        );
        if self.cancelled {
            summary.push_str(&format!(", cancelled with {} not attempted", self.not_attempted));
        }
        summary
    }
}
