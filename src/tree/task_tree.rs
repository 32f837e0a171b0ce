use crate::remote::types::{ItemId, RemoteItem};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Fetch-integrity violations found while rebuilding the forest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("Item {item_id} references parent {parent_id}, which was not fetched")]
    OrphanedParent { item_id: ItemId, parent_id: ItemId },
    #[error("Item {0} appears more than once in the fetched set")]
    DuplicateId(ItemId),
    #[error("Parent chain of item {0} loops back on itself")]
    ParentCycle(ItemId),
}

/// Remote items reconstructed into a parent → children forest.
///
/// Roots and child lists keep fetch encounter order, so every traversal is
/// deterministic for a given fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskTree {
    items: HashMap<ItemId, RemoteItem>,
    order: Vec<ItemId>,
    roots: Vec<ItemId>,
    children: HashMap<ItemId, Vec<ItemId>>,
}

/// Summary counts for display and logging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStatistics {
    pub total: usize,
    /// Items without a parent
    pub epics: usize,
    /// Items with a parent
    pub stories: usize,
    pub closed: usize,
    pub max_depth: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the forest from a complete fetch.
    ///
    /// Fails when an id repeats, a parent id does not resolve, or a parent
    /// chain forms a cycle.
    pub fn from_items(items: Vec<RemoteItem>) -> Result<Self, TreeError> {
        let mut tree = Self::new();

        for item in items {
            if tree.items.contains_key(&item.id) {
                return Err(TreeError::DuplicateId(item.id));
            }
            tree.order.push(item.id.clone());
            tree.items.insert(item.id.clone(), item);
        }

        for id in &tree.order {
            let item = &tree.items[id];
            match &item.parent_id {
                Some(parent_id) => {
                    if !tree.items.contains_key(parent_id) {
                        return Err(TreeError::OrphanedParent {
                            item_id: id.clone(),
                            parent_id: parent_id.clone(),
                        });
                    }
                    tree.children
                        .entry(parent_id.clone())
                        .or_default()
                        .push(id.clone());
                }
                None => tree.roots.push(id.clone()),
            }
        }

        let mut verified = HashSet::new();
        for id in &tree.order {
            if tree.has_parent_cycle(id, &mut verified) {
                return Err(TreeError::ParentCycle(id.clone()));
            }
        }

        debug!(
            "Rebuilt task tree: {} items, {} roots",
            tree.items.len(),
            tree.roots.len()
        );
        Ok(tree)
    }

    /// Walk up from `id`; ids already proven to reach a root are skipped
    fn has_parent_cycle(&self, id: &ItemId, verified: &mut HashSet<ItemId>) -> bool {
        let mut path = HashSet::new();
        let mut current = Some(id);

        while let Some(current_id) = current {
            if verified.contains(current_id) {
                break;
            }
            if !path.insert(current_id.clone()) {
                return true;
            }
            current = self
                .items
                .get(current_id)
                .and_then(|item| item.parent_id.as_ref());
        }

        verified.extend(path);
        false
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&RemoteItem> {
        self.items.get(id)
    }

    /// All items in fetch encounter order
    pub fn items(&self) -> impl Iterator<Item = &RemoteItem> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn roots(&self) -> &[ItemId] {
        &self.roots
    }

    pub fn children(&self, id: &str) -> &[ItemId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent(&self, id: &str) -> Option<&RemoteItem> {
        self.items
            .get(id)
            .and_then(|item| item.parent_id.as_deref())
            .and_then(|parent_id| self.items.get(parent_id))
    }

    /// Number of edges between `id` and its root; `None` for unknown ids
    pub fn depth(&self, id: &str) -> Option<usize> {
        let mut item = self.items.get(id)?;
        let mut depth = 0;
        while let Some(parent) = item.parent_id.as_deref().and_then(|p| self.items.get(p)) {
            depth += 1;
            item = parent;
        }
        Some(depth)
    }

    /// True when `ancestor` lies on the parent chain of `id`
    pub fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        let mut current = self.items.get(id).and_then(|item| item.parent_id.as_deref());
        while let Some(parent_id) = current {
            if parent_id == ancestor {
                return true;
            }
            current = self
                .items
                .get(parent_id)
                .and_then(|item| item.parent_id.as_deref());
        }
        false
    }

    /// Children of `parent` (or roots when `None`) whose name equals `name`
    pub fn find_by_name(&self, parent: Option<&str>, name: &str) -> Vec<&RemoteItem> {
        let candidates = match parent {
            Some(parent_id) => self.children(parent_id),
            None => self.roots(),
        };
        candidates
            .iter()
            .filter_map(|id| self.items.get(id))
            .filter(|item| item.name.trim() == name.trim())
            .collect()
    }

    /// Every item below `id`, children before their parents
    pub fn descendants_post_order(&self, id: &str) -> Vec<&ItemId> {
        let mut out = Vec::new();
        for child in self.children(id) {
            self.collect_post_order(child, &mut out);
        }
        out
    }

    /// The whole forest, each child before its parent and roots in encounter order
    pub fn post_order(&self) -> Vec<&ItemId> {
        let mut out = Vec::with_capacity(self.items.len());
        for root in &self.roots {
            self.collect_post_order(root, &mut out);
        }
        out
    }

    fn collect_post_order<'a>(&'a self, id: &'a ItemId, out: &mut Vec<&'a ItemId>) {
        for child in self.children(id) {
            self.collect_post_order(child, out);
        }
        out.push(id);
    }

    pub fn statistics(&self) -> TreeStatistics {
        let mut stats = TreeStatistics {
            total: self.items.len(),
            epics: self.roots.len(),
            stories: self.items.len() - self.roots.len(),
            ..Default::default()
        };

        for item in self.items.values() {
            if item.status.is_closed() {
                stats.closed += 1;
            }
            *stats.by_status.entry(item.status.name.clone()).or_default() += 1;
            if let Some(depth) = self.depth(&item.id) {
                stats.max_depth = stats.max_depth.max(depth);
            }
        }

        stats
    }
}
