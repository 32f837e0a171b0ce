use crate::desired::{DesiredItem, DuplicateSet, ItemKey};
use crate::reconcile::plan::{MutationPlan, Operation, ParentRef, RetainReason};
use crate::remote::types::{ItemChanges, ItemId, ItemStatus, RemoteItem};
use crate::tree::TaskTree;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Prefix written in front of the description of closed duplicates
pub const AUTO_CLOSED_MARKER: &str = "[AUTO-CLOSED]";

/// Caller errors in the desired state. Raised before any mutation is planned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("'{name}' declares parent {parent}, which does not exist remotely")]
    UnresolvedParent { name: String, parent: ItemId },
    #[error("'{name}' declares parent {parent}, which lies inside its own subtree")]
    ParentLoop { name: String, parent: ItemId },
    #[error("'{name}' matches several remote items by name: {}", .candidates.join(", "))]
    AmbiguousMatch { name: String, candidates: Vec<ItemId> },
    #[error("'{name}' is keyed to remote id {id}, which does not exist")]
    UnknownRemoteId { name: String, id: ItemId },
    #[error("Remote item {id} is claimed by both '{first}' and '{second}'")]
    DuplicateClaim {
        id: ItemId,
        first: String,
        second: String,
    },
    #[error("Remote item {id} is listed as a duplicate but is also claimed by '{name}'")]
    DuplicateConflict { id: ItemId, name: String },
    #[error("Sibling items share the name '{name}'; give them distinct names or ids")]
    DuplicateSiblingName { name: String },
}

fn default_preserve_statuses() -> Vec<String> {
    [
        "completed",
        "complete",
        "done",
        "closed",
        "review",
        "read to test",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_close_status() -> String {
    "closed".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Statuses whose items are never deleted (case-insensitive)
    #[serde(default = "default_preserve_statuses")]
    pub preserve_statuses: Vec<String>,
    /// Status written by a `Close`
    #[serde(default = "default_close_status")]
    pub close_status: String,
    /// Status sent with a `Create` when the desired item names none
    #[serde(default)]
    pub create_status: Option<String>,
    /// Leave matched items in a preserve status untouched
    #[serde(default = "default_true")]
    pub freeze_preserved: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            preserve_statuses: default_preserve_statuses(),
            close_status: default_close_status(),
            create_status: None,
            freeze_preserved: true,
        }
    }
}

impl ReconcileOptions {
    pub fn is_preserved(&self, status: &ItemStatus) -> bool {
        self.preserve_statuses.iter().any(|s| status.matches(s))
    }
}

/// Where the children of the item being visited attach
#[derive(Debug, Clone)]
enum Anchor {
    Root,
    Remote(ItemId),
    Pending(usize),
}

impl Anchor {
    fn parent_ref(&self) -> Option<ParentRef> {
        match self {
            Anchor::Root => None,
            Anchor::Remote(id) => Some(ParentRef::Remote(id.clone())),
            Anchor::Pending(index) => Some(ParentRef::Pending(*index)),
        }
    }
}

/// Diffs a desired forest against a fetched [`TaskTree`].
///
/// Planning is pure: the same tree, forest and duplicate set always give the
/// same plan.
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn plan(
        &self,
        tree: &TaskTree,
        desired: &[DesiredItem],
        duplicates: &DuplicateSet,
    ) -> Result<MutationPlan, SpecError> {
        let mut builder = PlanBuilder::new(tree, &self.options, duplicates);
        builder.collect_id_claims(desired)?;
        check_sibling_names(desired)?;

        for item in desired {
            let anchor = match &item.parent {
                Some(parent) => {
                    if !tree.contains(parent) {
                        return Err(SpecError::UnresolvedParent {
                            name: item.name.clone(),
                            parent: parent.clone(),
                        });
                    }
                    builder.anchors.insert(parent.clone());
                    Anchor::Remote(parent.clone())
                }
                None => Anchor::Root,
            };
            builder.visit(item, &anchor, item.parent.is_some())?;
        }

        builder.plan_removals();

        let plan = builder.plan;
        info!("Reconciliation planned {}", plan.summary());
        Ok(plan)
    }
}

fn check_sibling_names(items: &[DesiredItem]) -> Result<(), SpecError> {
    let mut seen = HashSet::new();
    for item in items {
        if item.key == ItemKey::Name && !seen.insert((item.parent.as_deref(), item.name.trim())) {
            return Err(SpecError::DuplicateSiblingName {
                name: item.name.clone(),
            });
        }
        check_sibling_names(&item.children)?;
    }
    Ok(())
}

struct PlanBuilder<'a> {
    tree: &'a TaskTree,
    options: &'a ReconcileOptions,
    duplicates: &'a DuplicateSet,
    plan: MutationPlan,
    /// Remote ids claimed through an explicit id key, with the claiming name
    id_claims: HashMap<ItemId, String>,
    /// Every remote id matched by some desired item
    matched: HashSet<ItemId>,
    /// Matched items that leave their current parent
    moved_out: HashSet<ItemId>,
    /// Remote items named as explicit parents
    anchors: HashSet<ItemId>,
}

impl<'a> PlanBuilder<'a> {
    fn new(tree: &'a TaskTree, options: &'a ReconcileOptions, duplicates: &'a DuplicateSet) -> Self {
        Self {
            tree,
            options,
            duplicates,
            plan: MutationPlan::new(),
            id_claims: HashMap::new(),
            matched: HashSet::new(),
            moved_out: HashSet::new(),
            anchors: HashSet::new(),
        }
    }

    fn collect_id_claims(&mut self, items: &[DesiredItem]) -> Result<(), SpecError> {
        for item in items {
            if let ItemKey::Id(id) = &item.key {
                if !self.tree.contains(id) {
                    return Err(SpecError::UnknownRemoteId {
                        name: item.name.clone(),
                        id: id.clone(),
                    });
                }
                if self.duplicates.contains_key(id) {
                    return Err(SpecError::DuplicateConflict {
                        id: id.clone(),
                        name: item.name.clone(),
                    });
                }
                if let Some(first) = self.id_claims.insert(id.clone(), item.name.clone()) {
                    return Err(SpecError::DuplicateClaim {
                        id: id.clone(),
                        first,
                        second: item.name.clone(),
                    });
                }
            }
            self.collect_id_claims(&item.children)?;
        }
        Ok(())
    }

    /// Find the remote counterpart of `item` among the children of `anchor`
    fn resolve(&self, item: &DesiredItem, anchor: &Anchor) -> Result<Option<&'a RemoteItem>, SpecError> {
        if let ItemKey::Id(id) = &item.key {
            return Ok(self.tree.get(id));
        }

        let parent = match anchor {
            Anchor::Root => None,
            Anchor::Remote(id) => Some(id.as_str()),
            // a parent created by this plan has no children yet
            Anchor::Pending(_) => return Ok(None),
        };

        let candidates: Vec<&RemoteItem> = self
            .tree
            .find_by_name(parent, &item.name)
            .into_iter()
            .filter(|remote| !self.duplicates.contains_key(&remote.id))
            .filter(|remote| !self.id_claims.contains_key(&remote.id))
            .filter(|remote| !self.matched.contains(&remote.id))
            .collect();

        match candidates.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            _ => {
                // several matches: an open item wins over closed leftovers
                let open: Vec<&RemoteItem> = candidates
                    .iter()
                    .copied()
                    .filter(|remote| !remote.status.is_closed())
                    .collect();
                match open.as_slice() {
                    [only] => {
                        let passed_over: Vec<String> = candidates
                            .iter()
                            .filter(|remote| remote.id != only.id)
                            .map(|remote| format!("{} ({})", remote.id, remote.status))
                            .collect();
                        warn!(
                            "'{}' matches {} remote items; using open item {} over closed {}",
                            item.name,
                            candidates.len(),
                            only.id,
                            passed_over.join(", ")
                        );
                        Ok(Some(*only))
                    }
                    _ => Err(SpecError::AmbiguousMatch {
                        name: item.name.clone(),
                        candidates: candidates.iter().map(|r| r.id.clone()).collect(),
                    }),
                }
            }
        }
    }

    /// Pre-order walk: the item's own operations, then its children
    fn visit(&mut self, item: &DesiredItem, anchor: &Anchor, explicit_parent: bool) -> Result<(), SpecError> {
        let child_anchor = match self.resolve(item, anchor)? {
            None => {
                let payload = item.to_new_item(None, self.options.create_status.as_deref());
                let index = self.plan.push(Operation::create(payload, anchor.parent_ref()));
                debug!("Planned create #{} '{}'", index, item.name);
                Anchor::Pending(index)
            }
            Some(remote) => {
                self.matched.insert(remote.id.clone());
                self.plan_matched(item, remote, anchor, explicit_parent)?;
                Anchor::Remote(remote.id.clone())
            }
        };

        for child in &item.children {
            self.visit(child, &child_anchor, true)?;
        }
        Ok(())
    }

    fn plan_matched(
        &mut self,
        item: &DesiredItem,
        remote: &RemoteItem,
        anchor: &Anchor,
        enforce_parent: bool,
    ) -> Result<(), SpecError> {
        if let Anchor::Remote(parent) = anchor {
            if *parent == remote.id || self.tree.is_ancestor(&remote.id, parent) {
                return Err(SpecError::ParentLoop {
                    name: item.name.clone(),
                    parent: parent.clone(),
                });
            }
        }

        if self.options.freeze_preserved && self.options.is_preserved(&remote.status) {
            debug!("'{}' ({}) is frozen in status {}", remote.name, remote.id, remote.status);
            self.plan.retain(
                remote.id.clone(),
                &remote.name,
                RetainReason::Frozen(remote.status.name.clone()),
            );
            return Ok(());
        }

        let changes = diff(item, remote);
        if !changes.is_empty() {
            self.plan
                .push(Operation::update(remote.id.clone(), &item.name, changes));
        }

        if enforce_parent {
            let moved = match anchor {
                Anchor::Root => remote.parent_id.is_some(),
                Anchor::Remote(parent) => remote.parent_id.as_ref() != Some(parent),
                Anchor::Pending(_) => true,
            };
            if moved {
                self.moved_out.insert(remote.id.clone());
                self.plan.push(Operation::move_to(
                    remote.id.clone(),
                    &item.name,
                    anchor.parent_ref(),
                ));
            }
        }

        Ok(())
    }

    /// Children-first pass over the remote forest for everything not matched
    fn plan_removals(&mut self) {
        let mut survives: HashMap<&ItemId, bool> = HashMap::new();

        for id in self.tree.post_order() {
            let Some(remote) = self.tree.get(id) else {
                continue;
            };

            let keeps_descendant = self
                .tree
                .children(id)
                .iter()
                .filter(|child| !self.moved_out.contains(*child))
                .any(|child| survives.get(child).copied().unwrap_or(false));

            let survived = if self.matched.contains(id) {
                true
            } else if let Some(reason) = self.closing_reason(remote) {
                if remote.status.is_closed() || remote.status.matches(&self.options.close_status) {
                    self.plan.retain(id.clone(), &remote.name, RetainReason::AlreadyClosed);
                } else {
                    let changes = ItemChanges {
                        status: Some(self.options.close_status.clone()),
                        description: Some(closed_description(&reason, &remote.description)),
                        ..Default::default()
                    };
                    self.plan
                        .push(Operation::close(id.clone(), &remote.name, reason, changes));
                }
                true
            } else if self.options.is_preserved(&remote.status) {
                self.plan.retain(
                    id.clone(),
                    &remote.name,
                    RetainReason::PreservedStatus(remote.status.name.clone()),
                );
                true
            } else if self.anchors.contains(id) {
                self.plan.retain(id.clone(), &remote.name, RetainReason::Anchor);
                true
            } else if keeps_descendant {
                warn!(
                    "Keeping unmatched item '{}' ({}): items below it survive",
                    remote.name, id
                );
                self.plan
                    .retain(id.clone(), &remote.name, RetainReason::ProtectsDescendants);
                true
            } else {
                self.plan.push(Operation::delete(id.clone(), &remote.name));
                false
            };

            survives.insert(id, survived);
        }

        for id in self.duplicates.keys() {
            if !self.tree.contains(id) {
                warn!("Duplicate {} is not in the fetched tree, nothing to close", id);
            }
        }
    }

    /// Reason to close an unmatched item: it or one of its unmatched ancestors
    /// is a declared duplicate
    fn closing_reason(&self, remote: &RemoteItem) -> Option<String> {
        if let Some(reason) = self.duplicates.get(&remote.id) {
            return Some(reason.clone());
        }

        let mut current = self.tree.parent(&remote.id);
        while let Some(ancestor) = current {
            if self.matched.contains(&ancestor.id) {
                return None;
            }
            if let Some(reason) = self.duplicates.get(&ancestor.id) {
                return Some(format!("parent {} closed: {}", ancestor.id, reason));
            }
            current = self.tree.parent(&ancestor.id);
        }
        None
    }
}

/// Field changes that bring `remote` in line with `item`.
///
/// An empty desired description or tag set and an absent priority or status
/// leave the remote value alone.
fn diff(item: &DesiredItem, remote: &RemoteItem) -> ItemChanges {
    let mut changes = ItemChanges::default();

    if item.name.trim() != remote.name.trim() {
        changes.name = Some(item.name.trim().to_string());
    }

    if !item.description.trim().is_empty()
        && item.description.trim_end() != remote.description.trim_end()
    {
        changes.description = Some(item.description.clone());
    }

    if item.priority.is_some() && item.priority != remote.priority {
        changes.priority = item.priority;
    }

    if !item.tags.is_empty() {
        let desired: BTreeSet<String> = item.tags.iter().map(|t| t.trim().to_lowercase()).collect();
        let current: BTreeSet<String> = remote.tags.iter().map(|t| t.trim().to_lowercase()).collect();
        if desired != current {
            changes.tags = Some(item.tags.iter().cloned().collect());
        }
    }

    if let Some(status) = &item.status {
        if !remote.status.matches(status) {
            changes.status = Some(status.clone());
        }
    }

    changes
}

fn closed_description(reason: &str, original: &str) -> String {
    let original = original.trim();
    if original.starts_with(AUTO_CLOSED_MARKER) {
        return original.to_string();
    }
    if original.is_empty() {
        format!("{} {}", AUTO_CLOSED_MARKER, reason)
    } else {
        format!("{} {}\n\n{}", AUTO_CLOSED_MARKER, reason, original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::plan::{OperationKind, OperationPayload};
    use crate::remote::types::{Priority, StatusKind};
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::Level;
    use tracing_subscriber::fmt::MakeWriter;

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

    fn with_status(mut item: RemoteItem, status: &str, kind: StatusKind) -> RemoteItem {
        item.status = ItemStatus::new(status, kind);
        item
    }

    fn tree(items: Vec<RemoteItem>) -> TaskTree {
        TaskTree::from_items(items).unwrap()
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(ReconcileOptions::default())
    }

    fn kinds(plan: &MutationPlan) -> Vec<OperationKind> {
        plan.operations().iter().map(|op| op.kind).collect()
    }

    fn email_epic() -> DesiredItem {
        DesiredItem::new("Email Integration")
            .with_child(DesiredItem::new("Inbox sync"))
            .with_child(DesiredItem::new("Outbound send"))
    }

    #[test]
    fn test_empty_remote_creates_parent_first() {
        let plan = reconciler()
            .plan(&TaskTree::new(), &[email_epic()], &DuplicateSet::new())
            .unwrap();

        assert_eq!(kinds(&plan), vec![OperationKind::Create; 3]);
        assert_eq!(plan.operations()[0].parent_ref(), None);
        assert_eq!(plan.operations()[1].parent_ref(), Some(&ParentRef::Pending(0)));
        assert_eq!(plan.operations()[2].parent_ref(), Some(&ParentRef::Pending(0)));
        assert!(plan.verify_ordering(&TaskTree::new()).is_ok());
    }

    #[test]
    fn test_converged_tree_yields_empty_plan() {
        let remote_tree = tree(vec![
            remote("e1", "Email Integration", None),
            remote("s1", "Inbox sync", Some("e1")),
            remote("s2", "Outbound send", Some("e1")),
        ]);
        let plan = reconciler()
            .plan(&remote_tree, &[email_epic()], &DuplicateSet::new())
            .unwrap();
        assert!(plan.is_empty(), "unexpected operations: {:?}", plan.operations());
    }

    #[test]
    fn test_field_drift_yields_update() {
        let mut epic = remote("e1", "Email Integration", None);
        epic.description = "old".to_string();
        epic.priority = Some(Priority::LOW);
        epic.tags.insert("now".to_string());

        let desired = DesiredItem::new("Email Integration")
            .with_description("new")
            .with_priority(Priority::HIGH)
            .with_tags(["now", "epic"]);

        let plan = reconciler()
            .plan(&tree(vec![epic]), &[desired], &DuplicateSet::new())
            .unwrap();

        assert_eq!(kinds(&plan), vec![OperationKind::Update]);
        let OperationPayload::Update { changes } = &plan.operations()[0].payload else {
            panic!("expected update payload");
        };
        assert_eq!(changes.description.as_deref(), Some("new"));
        assert_eq!(changes.priority, Some(Priority::HIGH));
        assert_eq!(
            changes.tags,
            Some(vec!["epic".to_string(), "now".to_string()])
        );
        assert_eq!(changes.name, None);
    }

    #[test]
    fn test_trailing_whitespace_is_not_drift() {
        let mut epic = remote("e1", "Epic", None);
        epic.description = "Body\n".to_string();
        let desired = DesiredItem::new("Epic").with_description("Body");
        let plan = reconciler()
            .plan(&tree(vec![epic]), &[desired], &DuplicateSet::new())
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_id_keyed_story_moves_to_new_parent() {
        let remote_tree = tree(vec![
            remote("e1", "Old epic", None),
            remote("s1", "Inbox sync", Some("e1")),
            remote("e2", "Email Integration", None),
        ]);
        let desired = vec![
            DesiredItem::new("Old epic"),
            DesiredItem::new("Email Integration")
                .with_child(DesiredItem::new("Inbox sync").with_id("s1")),
        ];

        let plan = reconciler()
            .plan(&remote_tree, &desired, &DuplicateSet::new())
            .unwrap();

        assert_eq!(kinds(&plan), vec![OperationKind::Move]);
        assert_eq!(plan.operations()[0].target.as_deref(), Some("s1"));
        assert_eq!(
            plan.operations()[0].parent_ref(),
            Some(&ParentRef::Remote("e2".to_string()))
        );
    }

    #[test]
    fn test_move_under_pending_parent() {
        let remote_tree = tree(vec![remote("s1", "Inbox sync", None)]);
        let desired =
            vec![DesiredItem::new("Email Integration").with_child(DesiredItem::new("Inbox").with_id("s1"))];

        let plan = reconciler()
            .plan(&remote_tree, &desired, &DuplicateSet::new())
            .unwrap();

        assert_eq!(
            kinds(&plan),
            vec![OperationKind::Create, OperationKind::Update, OperationKind::Move]
        );
        assert_eq!(plan.operations()[2].parent_ref(), Some(&ParentRef::Pending(0)));
        assert!(plan.verify_ordering(&remote_tree).is_ok());
    }

    #[test]
    fn test_unmatched_subtree_deleted_children_first() {
        let remote_tree = tree(vec![
            remote("e1", "Stale epic", None),
            remote("s1", "Stale story", Some("e1")),
            remote("t1", "Stale subtask", Some("s1")),
            remote("s2", "Stale story 2", Some("e1")),
            remote("keep", "Kept epic", None),
        ]);
        let plan = reconciler()
            .plan(&remote_tree, &[DesiredItem::new("Kept epic")], &DuplicateSet::new())
            .unwrap();

        let targets: Vec<&str> = plan
            .operations()
            .iter()
            .map(|op| op.target.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(targets, vec!["t1", "s1", "s2", "e1"]);
        assert!(kinds(&plan).iter().all(|k| *k == OperationKind::Delete));
        assert!(plan.verify_ordering(&remote_tree).is_ok());
    }

    #[test]
    fn test_duplicate_is_closed_not_deleted() {
        let mut dup = remote("dup", "Email Integration (old)", None);
        dup.description = "Original notes".to_string();
        let remote_tree = tree(vec![
            remote("e1", "Email Integration", None),
            dup,
            remote("dup-story", "Old story", Some("dup")),
        ]);
        let mut duplicates = DuplicateSet::new();
        duplicates.insert("dup".to_string(), "duplicate of e1".to_string());

        let plan = reconciler()
            .plan(&remote_tree, &[DesiredItem::new("Email Integration")], &duplicates)
            .unwrap();

        assert_eq!(kinds(&plan), vec![OperationKind::Close, OperationKind::Close]);
        assert_eq!(plan.operations()[0].target.as_deref(), Some("dup-story"));

        let close = &plan.operations()[1];
        assert_eq!(close.target.as_deref(), Some("dup"));
        let OperationPayload::Close { reason, changes } = &close.payload else {
            panic!("expected close payload");
        };
        assert_eq!(reason, "duplicate of e1");
        assert_eq!(changes.status.as_deref(), Some("closed"));
        assert_eq!(
            changes.description.as_deref(),
            Some("[AUTO-CLOSED] duplicate of e1\n\nOriginal notes")
        );
        assert!(plan.operations().iter().all(|op| op.kind != OperationKind::Delete));
    }

    #[test]
    fn test_already_closed_duplicate_skipped() {
        let remote_tree = tree(vec![with_status(
            remote("dup", "Old", None),
            "closed",
            StatusKind::Closed,
        )]);
        let mut duplicates = DuplicateSet::new();
        duplicates.insert("dup".to_string(), "dup".to_string());

        let plan = reconciler().plan(&remote_tree, &[], &duplicates).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.retained()[0].reason, RetainReason::AlreadyClosed);
    }

    #[test]
    fn test_preserved_descendant_keeps_ancestor() {
        let remote_tree = tree(vec![
            remote("e1", "Old epic", None),
            with_status(remote("s1", "Shipped", Some("e1")), "Complete", StatusKind::Closed),
            remote("s2", "Abandoned", Some("e1")),
        ]);
        let plan = reconciler()
            .plan(&remote_tree, &[], &DuplicateSet::new())
            .unwrap();

        assert_eq!(kinds(&plan), vec![OperationKind::Delete]);
        assert_eq!(plan.operations()[0].target.as_deref(), Some("s2"));
        let reasons: Vec<&RetainReason> = plan.retained().iter().map(|r| &r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                &RetainReason::PreservedStatus("complete".to_string()),
                &RetainReason::ProtectsDescendants
            ]
        );
    }

    #[test]
    fn test_moved_out_child_does_not_protect_old_parent() {
        let remote_tree = tree(vec![
            remote("old", "Old epic", None),
            remote("s1", "Story", Some("old")),
            remote("new", "New epic", None),
        ]);
        let desired =
            vec![DesiredItem::new("New epic").with_child(DesiredItem::new("Story").with_id("s1"))];

        let plan = reconciler()
            .plan(&remote_tree, &desired, &DuplicateSet::new())
            .unwrap();

        assert_eq!(kinds(&plan), vec![OperationKind::Move, OperationKind::Delete]);
        assert_eq!(plan.operations()[1].target.as_deref(), Some("old"));
        assert!(plan.verify_ordering(&remote_tree).is_ok());
    }

    #[test]
    fn test_frozen_preserved_match() {
        let mut done = with_status(remote("s1", "Inbox", Some("e1")), "done", StatusKind::Closed);
        done.description = "as shipped".to_string();
        let remote_tree = tree(vec![remote("e1", "Epic", None), done]);
        let desired = vec![
            DesiredItem::new("Epic").with_child(DesiredItem::new("Inbox").with_description("rewritten")),
        ];

        let plan = reconciler()
            .plan(&remote_tree, &desired, &DuplicateSet::new())
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.retained()[0].reason, RetainReason::Frozen("done".to_string()));

        let thawed = Reconciler::new(ReconcileOptions {
            freeze_preserved: false,
            ..Default::default()
        });
        let plan = thawed.plan(&remote_tree, &desired, &DuplicateSet::new()).unwrap();
        assert_eq!(kinds(&plan), vec![OperationKind::Update]);
    }

    #[test]
    fn test_desired_status_update() {
        let remote_tree = tree(vec![remote("s1", "Story", None)]);
        let desired = vec![DesiredItem::new("Story").with_status("DONE")];
        let plan = reconciler()
            .plan(&remote_tree, &desired, &DuplicateSet::new())
            .unwrap();
        let OperationPayload::Update { changes } = &plan.operations()[0].payload else {
            panic!("expected update payload");
        };
        assert_eq!(changes.status.as_deref(), Some("DONE"));

        let remote_tree = tree(vec![with_status(remote("s1", "Story", None), "done", StatusKind::Closed)]);
        let plan = Reconciler::new(ReconcileOptions {
            freeze_preserved: false,
            ..Default::default()
        })
        .plan(&remote_tree, &desired, &DuplicateSet::new())
        .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_explicit_parent_attach() {
        let remote_tree = tree(vec![
            remote("e9", "Existing epic", None),
            remote("s1", "Existing story", Some("e9")),
        ]);
        let desired = vec![DesiredItem::new("New story").with_parent("e9")];

        let plan = reconciler()
            .plan(&remote_tree, &desired, &DuplicateSet::new())
            .unwrap();

        // the existing epic is anchored; its unlisted story is not
        assert_eq!(kinds(&plan), vec![OperationKind::Create, OperationKind::Delete]);
        assert_eq!(
            plan.operations()[0].parent_ref(),
            Some(&ParentRef::Remote("e9".to_string()))
        );
        assert_eq!(plan.operations()[1].target.as_deref(), Some("s1"));
        assert_eq!(plan.retained()[0].reason, RetainReason::Anchor);
    }

    #[test]
    fn test_unresolved_parent_fails() {
        let desired = vec![DesiredItem::new("Story").with_parent("missing")];
        let err = reconciler()
            .plan(&TaskTree::new(), &desired, &DuplicateSet::new())
            .unwrap_err();
        assert_eq!(
            err,
            SpecError::UnresolvedParent {
                name: "Story".to_string(),
                parent: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_ambiguous_name_match_fails() {
        let remote_tree = tree(vec![
            remote("a", "Email Integration", None),
            remote("b", "Email Integration", None),
        ]);
        let err = reconciler()
            .plan(&remote_tree, &[DesiredItem::new("Email Integration")], &DuplicateSet::new())
            .unwrap_err();
        assert_eq!(
            err,
            SpecError::AmbiguousMatch {
                name: "Email Integration".to_string(),
                candidates: vec!["a".to_string(), "b".to_string()]
            }
        );

        // declaring one of them a duplicate resolves the ambiguity
        let mut duplicates = DuplicateSet::new();
        duplicates.insert("b".to_string(), "dup".to_string());
        let plan = reconciler()
            .plan(&remote_tree, &[DesiredItem::new("Email Integration")], &duplicates)
            .unwrap();
        assert_eq!(kinds(&plan), vec![OperationKind::Close]);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    struct LogWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogWriter;

        fn make_writer(&'a self) -> Self::Writer {
            LogWriter(Arc::clone(&self.0))
        }
    }

    impl io::Write for LogWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_closed_leftover_does_not_make_match_ambiguous() {
        let remote_tree = tree(vec![
            with_status(remote("a", "Epic", None), "closed", StatusKind::Closed),
            remote("b", "Epic", None),
        ]);

        let sink = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .with_max_level(Level::WARN)
            .finish();
        let plan = tracing::subscriber::with_default(subscriber, || {
            reconciler().plan(&remote_tree, &[DesiredItem::new("Epic")], &DuplicateSet::new())
        })
        .unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.retained()[0].id, "a");

        let logs = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let line = logs
            .lines()
            .find(|line| line.contains("'Epic' matches 2 remote items"))
            .expect("tie-break should be logged");
        assert!(line.contains("WARN"));
        assert!(line.contains("using open item b over closed a (closed)"));
    }

    #[test]
    fn test_id_key_errors() {
        let remote_tree = tree(vec![remote("a", "A", None)]);

        let err = reconciler()
            .plan(&remote_tree, &[DesiredItem::new("X").with_id("zz")], &DuplicateSet::new())
            .unwrap_err();
        assert!(matches!(err, SpecError::UnknownRemoteId { .. }));

        let err = reconciler()
            .plan(
                &remote_tree,
                &[DesiredItem::new("A").with_id("a"), DesiredItem::new("B").with_id("a")],
                &DuplicateSet::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SpecError::DuplicateClaim { .. }));

        let mut duplicates = DuplicateSet::new();
        duplicates.insert("a".to_string(), "dup".to_string());
        let err = reconciler()
            .plan(&remote_tree, &[DesiredItem::new("A").with_id("a")], &duplicates)
            .unwrap_err();
        assert!(matches!(err, SpecError::DuplicateConflict { .. }));
    }

    #[test]
    fn test_duplicate_sibling_names_rejected() {
        let desired = vec![
            DesiredItem::new("Epic")
                .with_child(DesiredItem::new("Story"))
                .with_child(DesiredItem::new("Story")),
        ];
        let err = reconciler()
            .plan(&TaskTree::new(), &desired, &DuplicateSet::new())
            .unwrap_err();
        assert_eq!(
            err,
            SpecError::DuplicateSiblingName {
                name: "Story".to_string()
            }
        );
    }

    #[test]
    fn test_parent_loop_rejected() {
        let remote_tree = tree(vec![remote("e1", "Epic", None), remote("s1", "Story", Some("e1"))]);
        let desired = vec![DesiredItem::new("Epic").with_id("e1").with_parent("s1")];
        let err = reconciler()
            .plan(&remote_tree, &desired, &DuplicateSet::new())
            .unwrap_err();
        assert!(matches!(err, SpecError::ParentLoop { .. }));
    }

    #[test]
    fn test_ordering_invariant_on_deep_mixed_plan() {
        let remote_tree = tree(vec![
            remote("e1", "Roadmap", None),
            remote("s1", "Kept story", Some("e1")),
            remote("x1", "Gone", Some("s1")),
            remote("e2", "Gone epic", None),
            remote("y1", "Gone story", Some("e2")),
        ]);
        let desired = vec![
            DesiredItem::new("Roadmap")
                .with_child(DesiredItem::new("Kept story").with_child(DesiredItem::new("New subtask")))
                .with_child(
                    DesiredItem::new("New story")
                        .with_child(DesiredItem::new("Deep").with_child(DesiredItem::new("Deeper"))),
                ),
        ];

        let plan = reconciler()
            .plan(&remote_tree, &desired, &DuplicateSet::new())
            .unwrap();
        assert!(plan.verify_ordering(&remote_tree).is_ok());

        let counts = plan.counts();
        assert_eq!(counts.creates, 4);
        assert_eq!(counts.deletes, 3);
        let targets: Vec<&str> = plan
            .operations()
            .iter()
            .filter_map(|op| op.target.as_deref())
            .collect();
        assert_eq!(targets, vec!["x1", "y1", "e2"]);
    }
}
