use crate::desired::{DesiredState, DuplicateSet};
use crate::executor::{CancelToken, ExecutorOptions, MutationExecutor};
use crate::reconcile::{MutationPlan, PlanOrderError, ReconcileOptions, Reconciler, SpecError};
use crate::remote::{BacklogApi, FetchError, FetchOptions, PaginatedFetcher};
use crate::sync::report::{SyncReport, Verification};
use crate::tree::{TaskTree, TreeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Failures that stop a run before any mutation is sent
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Fetched tree is inconsistent: {0}")]
    Tree(#[from] TreeError),
    #[error("Invalid desired state: {0}")]
    Spec(#[from] SpecError),
    #[error("Planner produced an unsafe order: {0}")]
    Plan(#[from] PlanOrderError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub fetch: FetchOptions,
    #[serde(default)]
    pub reconcile: ReconcileOptions,
    #[serde(default)]
    pub executor: ExecutorOptions,
    /// Duplicates known up front; desired-state files may add more
    #[serde(default)]
    pub duplicates: DuplicateSet,
    /// Compute the plan but send no mutation
    #[serde(default)]
    pub dry_run: bool,
    /// Re-fetch after applying and check that nothing is left to do
    #[serde(default)]
    pub verify: bool,
}

/// One collection, one desired state, one run at a time
pub struct BacklogSync {
    api: BacklogApi,
    options: SyncOptions,
    cancel: CancelToken,
}

impl BacklogSync {
    pub fn new(api: BacklogApi, options: SyncOptions) -> Self {
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

    pub fn api(&self) -> &BacklogApi {
        &self.api
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Fetch every page and rebuild the forest. A partial fetch is an error.
    pub async fn fetch_tree(&self) -> Result<TaskTree, SyncError> {
        let items = PaginatedFetcher::new(&self.api, self.options.fetch.clone())
            .fetch_all()
            .await?;
        Ok(TaskTree::from_items(items)?)
    }

    /// Plan against an already fetched tree
    pub fn plan_against(
        &self,
        tree: &TaskTree,
        desired: &DesiredState,
    ) -> Result<MutationPlan, SyncError> {
        let duplicates = desired.duplicate_set(&self.options.duplicates);
        let plan = Reconciler::new(self.options.reconcile.clone()).plan(
            tree,
            &desired.items,
            &duplicates,
        )?;
        plan.verify_ordering(tree)?;
        Ok(plan)
    }

    /// Fetch and plan without applying anything
    pub async fn plan(&self, desired: &DesiredState) -> Result<(TaskTree, MutationPlan), SyncError> {
        let tree = self.fetch_tree().await?;
        let plan = self.plan_against(&tree, desired)?;
        Ok((tree, plan))
    }

    /// Full run. Errors only when nothing was applied; partial application
    /// is reported through the returned [`SyncReport`].
    pub async fn run(&self, desired: &DesiredState) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Sync run {} started for collection {}",
            run_id,
            self.api.collection_id()
        );

        let (tree, plan) = self.plan(desired).await.inspect_err(|e| {
            error!("Sync run {} aborted before applying: {}", run_id, e);
        })?;
        Ok(self.apply(run_id, started_at, desired, &tree, &plan).await)
    }

    /// Apply a plan computed earlier by [`BacklogSync::plan`] without fetching again.
    ///
    /// `tree` must be the tree the plan was computed against.
    pub async fn run_with_plan(
        &self,
        desired: &DesiredState,
        tree: &TaskTree,
        plan: &MutationPlan,
    ) -> SyncReport {
        let run_id = Uuid::new_v4();
        info!(
            "Sync run {} applying a precomputed plan to collection {}",
            run_id,
            self.api.collection_id()
        );
        self.apply(run_id, Utc::now(), desired, tree, plan).await
    }

    async fn apply(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        desired: &DesiredState,
        tree: &TaskTree,
        plan: &MutationPlan,
    ) -> SyncReport {
        let mut report = SyncReport::new(run_id, started_at, self.api.collection_id());
        report.dry_run = self.options.dry_run;
        report.fetched = tree.len();
        report.planned = plan.counts();
        report.retained = plan.retained().to_vec();

        for operation in plan.operations() {
            info!("Planned: {}", operation);
        }
        for item in plan.retained() {
            info!("Retained {} '{}': {}", item.id, item.name, item.reason);
        }

        if self.options.dry_run {
            info!("Dry run: {}", plan.summary());
        } else if !plan.is_empty() {
            let execution = MutationExecutor::new(&self.api, self.options.executor.clone())
                .with_cancel_token(self.cancel.clone())
                .execute(plan)
                .await;
            report.absorb(&execution);

            if self.options.verify && !execution.cancelled {
                let verification = match self.verify(desired).await {
                    Ok(verification) => verification,
                    Err(e) => {
                        warn!("Sync run {} could not verify convergence: {}", run_id, e);
                        Verification::failed(e.to_string())
                    }
                };
                report.verification = Some(verification);
            }
        } else if self.options.verify {
            report.verification = Some(Verification {
                fetched: tree.len(),
                remaining: plan.counts(),
                converged: true,
                error: None,
            });
        }

        report.requests = self.api.statistics().await;
        report.finished_at = Utc::now();

        if report.is_success() {
            info!("Sync run {} finished: {}", run_id, report.summary());
        } else {
            warn!("Sync run {} finished with problems: {}", run_id, report.summary());
        }
        report
    }

    /// Re-fetch and re-plan; converged when the follow-up plan is empty
    pub async fn verify(&self, desired: &DesiredState) -> Result<Verification, SyncError> {
        let (tree, plan) = self.plan(desired).await?;
        let converged = plan.is_empty();
        if !converged {
            warn!("Remote has not converged: {}", plan.summary());
        }
        Ok(Verification {
            fetched: tree.len(),
            remaining: plan.counts(),
            converged,
            error: None,
        })
    }
}
