use crate::client::ClientError;
use crate::client::types::duration_secs;
use crate::executor::cancel::CancelToken;
use crate::executor::report::{ExecutionReport, OperationOutcome, OperationResult};
use crate::reconcile::{MutationPlan, Operation, OperationPayload, ParentRef};
use crate::remote::BacklogApi;
use crate::remote::types::{ItemChanges, ItemId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOptions {
    /// Fixed pause between two dispatched operations
    #[serde(default = "default_operation_delay", with = "duration_secs")]
    pub operation_delay: Duration,
}

fn default_operation_delay() -> Duration {
    Duration::from_millis(500)
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            operation_delay: default_operation_delay(),
        }
    }
}

/// Applies plans one operation at a time through a [`BacklogApi`]
pub struct MutationExecutor<'a> {
    api: &'a BacklogApi,
    options: ExecutorOptions,
    cancel: CancelToken,
}

impl<'a> MutationExecutor<'a> {
    pub fn new(api: &'a BacklogApi, options: ExecutorOptions) -> Self {
        Self {
            api,
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Replay `plan` in order.
    ///
    /// Never fails as a whole: every operation ends up applied, failed,
    /// skipped or not attempted in the returned report.
    pub async fn execute(&self, plan: &MutationPlan) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let mut dispatched = 0usize;

        info!("Applying {} operations", plan.len());

        for (index, operation) in plan.operations().iter().enumerate() {
            let result = |outcome| OperationResult {
                index,
                kind: operation.kind,
                target: operation.target.clone(),
                name: operation.name.clone(),
                outcome,
            };

            if report.cancelled || self.cancel.is_cancelled() {
                if !report.cancelled {
                    warn!(
                        "Cancelled before operation #{}; {} operations not attempted",
                        index + 1,
                        plan.len() - index
                    );
                    report.cancelled = true;
                }
                report.record(result(OperationOutcome::NotAttempted));
                continue;
            }

            let parent = match resolve_parent(operation.parent_ref(), &report.created) {
                Ok(parent) => parent,
                Err(reason) => {
                    warn!("Skipping {}: {}", operation, reason);
                    report.record(result(OperationOutcome::Skipped { reason }));
                    continue;
                }
            };

            if dispatched > 0 && !self.options.operation_delay.is_zero() {
                tokio::time::sleep(self.options.operation_delay).await;
                if self.cancel.is_cancelled() {
                    warn!(
                        "Cancelled before operation #{}; {} operations not attempted",
                        index + 1,
                        plan.len() - index
                    );
                    report.cancelled = true;
                    report.record(result(OperationOutcome::NotAttempted));
                    continue;
                }
            }
            dispatched += 1;

            debug!("Dispatching #{}: {}", index + 1, operation);
            match self.dispatch(operation, parent).await {
                Ok(id) => {
                    info!("Applied #{}: {} -> {}", index + 1, operation, id);
                    report.record(result(OperationOutcome::Applied { id }));
                }
                Err(e) => {
                    warn!("Operation #{} failed: {}: {}", index + 1, operation, e);
                    report.record(result(OperationOutcome::Failed {
                        error: e.to_string(),
                        status: e.status(),
                    }));
                }
            }
        }

        info!("Apply finished: {}", report.summary());
        report
    }

    /// Issue the REST call for one operation and return the id it acted on
    async fn dispatch(
        &self,
        operation: &Operation,
        parent: Option<ItemId>,
    ) -> Result<ItemId, ClientError> {
        match &operation.payload {
            OperationPayload::Create { item, .. } => {
                let mut item = item.clone();
                item.parent = parent;
                let created = self.api.create_item(&item).await?;
                Ok(created.id)
            }
            OperationPayload::Update { changes } | OperationPayload::Close { changes, .. } => {
                let target = target_of(operation)?;
                self.api.update_item(target, changes).await?;
                Ok(target.clone())
            }
            OperationPayload::Move { .. } => {
                let target = target_of(operation)?;
                let changes = ItemChanges {
                    parent: Some(parent),
                    ..Default::default()
                };
                self.api.update_item(target, &changes).await?;
                Ok(target.clone())
            }
            OperationPayload::Delete => {
                let target = target_of(operation)?;
                self.api.delete_item(target).await?;
                Ok(target.clone())
            }
        }
    }
}

fn target_of(operation: &Operation) -> Result<&ItemId, ClientError> {
    operation.target.as_ref().ok_or_else(|| {
        ClientError::InvalidRequest(format!("{} operation has no target", operation.kind))
    })
}

/// Real parent id for a create or move; `Err` when the parent was never created
fn resolve_parent(
    parent: Option<&ParentRef>,
    created: &BTreeMap<usize, ItemId>,
) -> Result<Option<ItemId>, String> {
    match parent {
        None => Ok(None),
        Some(ParentRef::Remote(id)) => Ok(Some(id.clone())),
        Some(ParentRef::Pending(index)) => created
            .get(index)
            .cloned()
            .map(Some)
            .ok_or_else(|| format!("parent create #{} did not succeed", index + 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desired::{DesiredItem, DuplicateSet};
    use crate::reconcile::{OperationKind, ReconcileOptions, Reconciler};
    use crate::remote::types::{ItemStatus, RemoteItem};
    use crate::testing::InMemoryBacklog;
    use crate::tree::TaskTree;

    fn remote(id: &str, name: &str, parent: Option<&str>) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            status: ItemStatus::default(),
            tags: Default::default(),
            priority: None,
            parent_id: parent.map(str::to_string),
        }
    }

    fn rename(id: &str, name: &str) -> Operation {
        Operation::update(
            id.to_string(),
            name,
            ItemChanges {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
    }

    fn email_plan() -> MutationPlan {
        let desired = DesiredItem::new("Email Integration")
            .with_child(DesiredItem::new("Inbox sync"))
            .with_child(DesiredItem::new("Outbound send"));
        Reconciler::new(ReconcileOptions::default())
            .plan(&TaskTree::new(), &[desired], &DuplicateSet::new())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_operation_does_not_stop_the_plan() {
        let backlog = InMemoryBacklog::new("L1").with_items([
            remote("a", "A", None),
            remote("b", "B", None),
            remote("c", "C", None),
            remote("d", "D", None),
            remote("e", "E", None),
        ]);
        backlog.fail_item("c", 403);
        let api = backlog.api().unwrap();

        let mut plan = MutationPlan::new();
        plan.push(rename("a", "A2"));
        plan.push(rename("b", "B2"));
        plan.push(Operation::delete("c".to_string(), "C"));
        plan.push(rename("d", "D2"));
        plan.push(Operation::delete("e".to_string(), "E"));

        let report = MutationExecutor::new(&api, ExecutorOptions::default())
            .execute(&plan)
            .await;

        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 1);
        assert!(!report.is_success());

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 2);
        assert_eq!(failures[0].identifier, "c");
        assert_eq!(report.failed_identifiers(), vec!["c".to_string()]);

        assert_eq!(backlog.get("a").unwrap().name, "A2");
        assert_eq!(backlog.get("d").unwrap().name, "D2");
        assert!(backlog.get("c").is_some());
        assert!(backlog.get("e").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_ids_thread_into_children() {
        let backlog = InMemoryBacklog::new("L1");
        let api = backlog.api().unwrap();
        let plan = email_plan();

        let report = MutationExecutor::new(&api, ExecutorOptions::default())
            .execute(&plan)
            .await;

        assert!(report.is_success());
        assert_eq!(report.created.len(), 3);

        let epic_id = report.created[&0].clone();
        for story in ["Inbox sync", "Outbound send"] {
            let found = backlog.find_by_name(story);
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].parent_id.as_ref(), Some(&epic_id));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_children_of_failed_create_are_skipped() {
        let backlog = InMemoryBacklog::new("L1");
        backlog.fail_create("Email Integration", 400);
        let api = backlog.api().unwrap();

        let report = MutationExecutor::new(&api, ExecutorOptions::default())
            .execute(&email_plan())
            .await;

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            report.failed_identifiers(),
            vec![
                "new:Email Integration".to_string(),
                "new:Inbox sync".to_string(),
                "new:Outbound send".to_string()
            ]
        );
        assert!(backlog.items().is_empty());
        // only the failing create reached the server
        assert_eq!(backlog.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_are_paced() {
        let backlog = InMemoryBacklog::new("L1");
        let api = backlog.api().unwrap();
        let started = tokio::time::Instant::now();

        MutationExecutor::new(
            &api,
            ExecutorOptions {
                operation_delay: Duration::from_millis(700),
            },
        )
        .execute(&email_plan())
        .await;

        assert!(started.elapsed() >= Duration::from_millis(1400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start() {
        let backlog = InMemoryBacklog::new("L1");
        let api = backlog.api().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = MutationExecutor::new(&api, ExecutorOptions::default())
            .with_cancel_token(cancel)
            .execute(&email_plan())
            .await;

        assert!(report.cancelled);
        assert_eq!(report.not_attempted, 3);
        assert_eq!(backlog.request_count(), 0);
        assert!(!report.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_operations() {
        let backlog = InMemoryBacklog::new("L1");
        let api = backlog.api().unwrap();
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            trigger.cancel();
        });

        let report = MutationExecutor::new(&api, ExecutorOptions::default())
            .with_cancel_token(cancel)
            .execute(&email_plan())
            .await;
        canceller.await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.not_attempted, 1);
        assert_eq!(
            report.results.last().map(|r| r.kind),
            Some(OperationKind::Create)
        );
        assert_eq!(backlog.items().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_and_close_dispatch() {
        let backlog = InMemoryBacklog::new("L1").with_items([
            remote("e1", "Epic", None),
            remote("e2", "Other", None),
            remote("s1", "Story", Some("e1")),
        ]);
        let api = backlog.api().unwrap();

        let mut plan = MutationPlan::new();
        plan.push(Operation::move_to(
            "s1".to_string(),
            "Story",
            Some(ParentRef::Remote("e2".to_string())),
        ));
        plan.push(Operation::close(
            "e1".to_string(),
            "Epic",
            "dup",
            ItemChanges {
                status: Some("closed".to_string()),
                description: Some("[AUTO-CLOSED] dup".to_string()),
                ..Default::default()
            },
        ));

        let report = MutationExecutor::new(&api, ExecutorOptions::default())
            .execute(&plan)
            .await;

        assert!(report.is_success());
        assert_eq!(backlog.get("s1").unwrap().parent_id.as_deref(), Some("e2"));
        let closed = backlog.get("e1").unwrap();
        assert!(closed.status.is_closed());
        assert_eq!(closed.description, "[AUTO-CLOSED] dup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_operation_still_applies() {
        let backlog = InMemoryBacklog::new("L1");
        backlog.push_rate_limits(3, 1);
        let api = backlog.api().unwrap();

        let report = MutationExecutor::new(&api, ExecutorOptions::default())
            .execute(&email_plan())
            .await;

        assert!(report.is_success());
        assert_eq!(backlog.items().len(), 3);
        assert_eq!(api.statistics().await.rate_limited, 3);
    }
}
