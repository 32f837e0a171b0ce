use crate::desired::tier::Tier;
use crate::remote::types::{ItemId, NewItem, Priority};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a desired item finds its remote counterpart
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKey {
    /// A known remote id
    Id(ItemId),
    /// Name equality among the children of the matched parent (or among roots)
    #[default]
    Name,
}

impl ItemKey {
    pub fn remote_id(&self) -> Option<&ItemId> {
        match self {
            ItemKey::Id(id) => Some(id),
            ItemKey::Name => None,
        }
    }

    fn is_name(&self) -> bool {
        matches!(self, ItemKey::Name)
    }
}

/// Target state of one item and, exclusively, of its children
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DesiredItem {
    #[serde(default, skip_serializing_if = "ItemKey::is_name")]
    pub key: ItemKey,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Target status; `None` leaves the remote status alone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Existing remote item to attach under. Only honoured on top-level items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DesiredItem>,
}

impl DesiredItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Top-level epic decorated for `tier`
    pub fn epic(tier: Tier, name: &str) -> Self {
        Self::new(name).with_tier(tier)
    }

    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.key = ItemKey::Id(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<ItemId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_child(mut self, child: DesiredItem) -> Self {
        self.children.push(child);
        self
    }

    /// Rewrite the name and tags of this epic and its stories for its tier
    pub fn apply_tier(&mut self) {
        let Some(tier) = self.tier.clone() else {
            return;
        };
        self.name = tier.epic_name(&self.name);
        self.tags.extend(tier.epic_tags());
        for child in &mut self.children {
            child.apply_story_tier(&tier);
        }
    }

    fn apply_story_tier(&mut self, tier: &Tier) {
        self.tags.extend(tier.story_tags());
        for child in &mut self.children {
            child.apply_story_tier(tier);
        }
    }

    /// Create payload for this item under `parent`
    pub fn to_new_item(&self, parent: Option<ItemId>, default_status: Option<&str>) -> NewItem {
        NewItem {
            name: self.name.trim().to_string(),
            description: self.description.clone(),
            status: self
                .status
                .clone()
                .or_else(|| default_status.map(str::to_string)),
            priority: self.priority,
            tags: self.tags.iter().cloned().collect(),
            parent,
        }
    }

    /// Number of items in this subtree, this one included
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(DesiredItem::subtree_len).sum::<usize>()
    }

    pub fn max_depth(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.max_depth())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_payload() {
        let story = DesiredItem::new("Inbox sync")
            .with_description("IMAP polling")
            .with_priority(Priority::HIGH)
            .with_tags(["story"]);
        let payload = story.to_new_item(Some("e1".to_string()), Some("backlog"));

        assert_eq!(payload.name, "Inbox sync");
        assert_eq!(payload.status.as_deref(), Some("backlog"));
        assert_eq!(payload.priority, Some(Priority::HIGH));
        assert_eq!(payload.tags, vec!["story".to_string()]);
        assert_eq!(payload.parent.as_deref(), Some("e1"));

        let done = DesiredItem::new("Shipped").with_status("done");
        assert_eq!(done.to_new_item(None, Some("backlog")).status.as_deref(), Some("done"));
    }

    #[test]
    fn test_apply_tier_decorates_subtree() {
        let mut epic = DesiredItem::epic(Tier::Now, "Email Integration")
            .with_child(DesiredItem::new("Inbox sync").with_child(DesiredItem::new("Retry")));
        epic.apply_tier();

        assert_eq!(epic.name, "[NOW] Email Integration");
        assert!(epic.tags.contains("roadmap"));
        assert!(epic.tags.contains("epic"));
        assert!(epic.children[0].tags.contains("story"));
        assert!(epic.children[0].children[0].tags.contains("now"));

        // idempotent
        let before = epic.clone();
        epic.apply_tier();
        assert_eq!(epic, before);
    }

    #[test]
    fn test_key_serde_shapes() {
        let item: DesiredItem = toml::from_str(
            r#"
            key = { id = "86e0" }
            name = "Epic"
            priority = 2
            "#,
        )
        .unwrap();
        assert_eq!(item.key, ItemKey::Id("86e0".to_string()));
        assert_eq!(item.priority, Some(Priority::HIGH));

        let item: DesiredItem = serde_json::from_str(r#"{"name": "Epic"}"#).unwrap();
        assert_eq!(item.key, ItemKey::Name);
        assert!(item.children.is_empty());
    }

    #[test]
    fn test_subtree_shape() {
        let epic = DesiredItem::new("E")
            .with_child(DesiredItem::new("S1").with_child(DesiredItem::new("T1")))
            .with_child(DesiredItem::new("S2"));
        assert_eq!(epic.subtree_len(), 4);
        assert_eq!(epic.max_depth(), 2);
    }
}
