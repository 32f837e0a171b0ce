//! Ordered mutation plans produced by the reconciler.
//!
//! A [`MutationPlan`] is a flat list of [`Operation`]s that must be replayed in
//! list order. Parents referenced by a `Create` or `Move` are either existing
//! remote items or an earlier `Create` in the same plan ([`ParentRef::Pending`]),
//! whose id only becomes known while the plan is applied.
//!
//! ## Ordering
//!
//! - every `Create` precedes the `Create`s of its declared children
//! - every `Delete`/`Close` of a node precedes the removal of its ancestors
//! - all removals follow all creates, updates and moves, so nothing is moved
//!   out of a subtree after that subtree is gone

use crate::remote::types::{ItemChanges, ItemId, NewItem};
use crate::tree::TaskTree;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Move,
    Close,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Move => "move",
            OperationKind::Close => "close",
            OperationKind::Delete => "delete",
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, OperationKind::Close | OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parent of a created or moved item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRef {
    /// An item that already exists remotely
    Remote(ItemId),
    /// The item created by the operation at this plan index
    Pending(usize),
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::Remote(id) => write!(f, "{}", id),
            ParentRef::Pending(index) => write!(f, "<new #{}>", index + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationPayload {
    /// `item.parent` is left empty; the executor fills it from `parent`
    Create {
        item: NewItem,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<ParentRef>,
    },
    Update {
        changes: ItemChanges,
    },
    /// `None` detaches the item to the top level
    Move {
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<ParentRef>,
    },
    Close {
        reason: String,
        changes: ItemChanges,
    },
    Delete,
}

/// One mutation of the remote tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub kind: OperationKind,
    /// Remote id acted on; `None` for a `Create`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ItemId>,
    /// Display name of the item
    pub name: String,
    pub payload: OperationPayload,
}

impl Operation {
    pub fn create(item: NewItem, parent: Option<ParentRef>) -> Self {
        Self {
            kind: OperationKind::Create,
            target: None,
            name: item.name.clone(),
            payload: OperationPayload::Create { item, parent },
        }
    }

    pub fn update(target: ItemId, name: impl Into<String>, changes: ItemChanges) -> Self {
        Self {
            kind: OperationKind::Update,
            target: Some(target),
            name: name.into(),
            payload: OperationPayload::Update { changes },
        }
    }

    pub fn move_to(target: ItemId, name: impl Into<String>, parent: Option<ParentRef>) -> Self {
        Self {
            kind: OperationKind::Move,
            target: Some(target),
            name: name.into(),
            payload: OperationPayload::Move { parent },
        }
    }

    pub fn close(
        target: ItemId,
        name: impl Into<String>,
        reason: impl Into<String>,
        changes: ItemChanges,
    ) -> Self {
        Self {
            kind: OperationKind::Close,
            target: Some(target),
            name: name.into(),
            payload: OperationPayload::Close {
                reason: reason.into(),
                changes,
            },
        }
    }

    pub fn delete(target: ItemId, name: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Delete,
            target: Some(target),
            name: name.into(),
            payload: OperationPayload::Delete,
        }
    }

    /// Parent reference carried by a `Create` or `Move`
    pub fn parent_ref(&self) -> Option<&ParentRef> {
        match &self.payload {
            OperationPayload::Create { parent, .. } | OperationPayload::Move { parent } => {
                parent.as_ref()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6} ", self.kind.as_str().to_uppercase())?;
        if let Some(target) = &self.target {
            write!(f, "{} ", target)?;
        }
        write!(f, "\"{}\"", self.name)?;

        match &self.payload {
            OperationPayload::Create { parent, .. } | OperationPayload::Move { parent } => {
                match parent {
                    Some(parent) => write!(f, " under {}", parent),
                    None => write!(f, " at top level"),
                }
            }
            OperationPayload::Update { changes } => {
                let mut fields = Vec::new();
                if changes.name.is_some() {
                    fields.push("name");
                }
                if changes.description.is_some() {
                    fields.push("description");
                }
                if changes.status.is_some() {
                    fields.push("status");
                }
                if changes.priority.is_some() {
                    fields.push("priority");
                }
                if changes.tags.is_some() {
                    fields.push("tags");
                }
                write!(f, " [{}]", fields.join(", "))
            }
            OperationPayload::Close { reason, .. } => write!(f, " ({})", reason),
            OperationPayload::Delete => Ok(()),
        }
    }
}

/// Why an item that is neither matched nor removed was left alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum RetainReason {
    /// Unmatched, but in a preserve status
    PreservedStatus(String),
    /// Matched, but frozen by its preserve status
    Frozen(String),
    /// Listed as a duplicate and already closed
    AlreadyClosed,
    /// Named as the explicit parent of a declared item
    Anchor,
    /// Unmatched, but something below it survives
    ProtectsDescendants,
}

impl fmt::Display for RetainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetainReason::PreservedStatus(status) => write!(f, "preserved status '{}'", status),
            RetainReason::Frozen(status) => write!(f, "frozen in status '{}'", status),
            RetainReason::AlreadyClosed => f.write_str("duplicate already closed"),
            RetainReason::Anchor => f.write_str("parent of declared items"),
            RetainReason::ProtectsDescendants => f.write_str("has surviving descendants"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetainedItem {
    pub id: ItemId,
    pub name: String,
    pub reason: RetainReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub creates: usize,
    pub updates: usize,
    pub moves: usize,
    pub closes: usize,
    pub deletes: usize,
}

impl PlanCounts {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.moves + self.closes + self.deletes
    }
}

/// A plan that breaks the replay-order guarantees
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanOrderError {
    #[error("Operation #{index} refers to pending parent #{parent}, which is not an earlier create")]
    ForwardReference { index: usize, parent: usize },
    #[error("Ancestor {ancestor} is removed before its descendant {descendant}")]
    AncestorRemovedFirst { ancestor: ItemId, descendant: ItemId },
    #[error("Operation #{index} touches {target} after it was removed")]
    UseAfterRemoval { index: usize, target: ItemId },
}

/// Ordered operations plus the items deliberately left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationPlan {
    operations: Vec<Operation>,
    retained: Vec<RetainedItem>,
}

impl MutationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation and return its index
    pub fn push(&mut self, operation: Operation) -> usize {
        self.operations.push(operation);
        self.operations.len() - 1
    }

    pub fn retain(&mut self, id: ItemId, name: impl Into<String>, reason: RetainReason) {
        self.retained.push(RetainedItem {
            id,
            name: name.into(),
            reason,
        });
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn retained(&self) -> &[RetainedItem] {
        &self.retained
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for operation in &self.operations {
            match operation.kind {
                OperationKind::Create => counts.creates += 1,
                OperationKind::Update => counts.updates += 1,
                OperationKind::Move => counts.moves += 1,
                OperationKind::Close => counts.closes += 1,
                OperationKind::Delete => counts.deletes += 1,
            }
        }
        counts
    }

    pub fn summary(&self) -> String {
        let counts = self.counts();
        format!(
            "{} operations: {} create, {} update, {} move, {} close, {} delete ({} retained)",
            counts.total(),
            counts.creates,
            counts.updates,
            counts.moves,
            counts.closes,
            counts.deletes,
            self.retained.len()
        )
    }

    /// Check the replay-order guarantees against the tree the plan was built from
    pub fn verify_ordering(&self, tree: &TaskTree) -> Result<(), PlanOrderError> {
        let mut removed: Vec<&ItemId> = Vec::new();

        for (index, operation) in self.operations.iter().enumerate() {
            if let Some(ParentRef::Pending(parent)) = operation.parent_ref() {
                let is_earlier_create = *parent < index
                    && self.operations[*parent].kind == OperationKind::Create;
                if !is_earlier_create {
                    return Err(PlanOrderError::ForwardReference {
                        index,
                        parent: *parent,
                    });
                }
            }

            if let Some(ParentRef::Remote(parent)) = operation.parent_ref() {
                if removed.iter().any(|id| *id == parent) {
                    return Err(PlanOrderError::UseAfterRemoval {
                        index,
                        target: parent.clone(),
                    });
                }
            }

            let Some(target) = &operation.target else {
                continue;
            };

            if removed.iter().any(|id| *id == target) {
                return Err(PlanOrderError::UseAfterRemoval {
                    index,
                    target: target.clone(),
                });
            }

            if operation.kind.is_removal() {
                if let Some(ancestor) = removed.iter().find(|id| tree.is_ancestor(id, target)) {
                    return Err(PlanOrderError::AncestorRemovedFirst {
                        ancestor: (*ancestor).clone(),
                        descendant: target.clone(),
                    });
                }
                removed.push(target);
            }
        }

        Ok(())
    }
}
