use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque identifier assigned by the remote system
pub type ItemId = String;

/// Item priority, 1 = urgent (highest) .. 4 = low
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const URGENT: Priority = Priority(1);
    pub const HIGH: Priority = Priority(2);
    pub const NORMAL: Priority = Priority(3);
    pub const LOW: Priority = Priority(4);

    pub fn new(value: u8) -> Option<Self> {
        (1..=4).contains(&value).then_some(Priority(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Parse a vendor priority label (`urgent`, `high`, `normal`, `low`) or a numeric string
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if let Ok(n) = label.parse::<u8>() {
            return Self::new(n);
        }
        match label.to_ascii_lowercase().as_str() {
            "urgent" => Some(Self::URGENT),
            "high" => Some(Self::HIGH),
            "normal" => Some(Self::NORMAL),
            "low" => Some(Self::LOW),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value).ok_or_else(|| format!("priority must be within 1..=4, got {}", value))
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> u8 {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.0 {
            1 => "urgent",
            2 => "high",
            3 => "normal",
            _ => "low",
        };
        write!(f, "{} ({})", self.0, label)
    }
}

/// Category of a status as reported by the remote system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Open,
    #[default]
    Custom,
    Done,
    Closed,
}

impl StatusKind {
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "open" => StatusKind::Open,
            "done" => StatusKind::Done,
            "closed" => StatusKind::Closed,
            _ => StatusKind::Custom,
        }
    }

    /// Guess the category of a bare status name from well-known workflow labels
    pub fn infer(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "open" | "backlog" | "to do" => StatusKind::Open,
            "closed" => StatusKind::Closed,
            "done" | "complete" | "completed" => StatusKind::Done,
            _ => StatusKind::Custom,
        }
    }
}

/// Status of a remote item. Names are workspace-defined and compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStatus {
    pub name: String,
    pub kind: StatusKind,
}

impl ItemStatus {
    pub fn new(name: impl Into<String>, kind: StatusKind) -> Self {
        Self {
            name: name.into().trim().to_lowercase(),
            kind,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.kind, StatusKind::Closed | StatusKind::Done)
    }
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::new("backlog", StatusKind::Open)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A node of the remote task tree, as returned by the list/get endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteItem {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub status: ItemStatus,
    pub tags: BTreeSet<String>,
    pub priority: Option<Priority>,
    /// Lookup key of the parent item, never an ownership edge
    pub parent_id: Option<ItemId>,
}

impl RemoteItem {
    /// Decode an item from the vendor JSON shape
    pub fn from_wire(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let wire: WireItem = serde_json::from_value(value)?;
        Ok(wire.into())
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Deserialize)]
struct WireItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<WireStatus>,
    #[serde(default)]
    tags: Option<Vec<WireTag>>,
    #[serde(default)]
    priority: Option<WirePriority>,
    #[serde(default)]
    parent: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireStatus {
    Plain(String),
    Object {
        status: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTag {
    Plain(String),
    Object { name: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePriority {
    Number(u8),
    Label(String),
    Object {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        priority: Option<String>,
    },
}

impl WirePriority {
    fn resolve(self) -> Option<Priority> {
        match self {
            WirePriority::Number(n) => Priority::new(n),
            WirePriority::Label(label) => Priority::from_label(&label),
            WirePriority::Object { id, priority } => id
                .as_deref()
                .and_then(Priority::from_label)
                .or_else(|| priority.as_deref().and_then(Priority::from_label)),
        }
    }
}

impl From<WireItem> for RemoteItem {
    fn from(wire: WireItem) -> Self {
        let status = match wire.status {
            Some(WireStatus::Plain(name)) => {
                let kind = StatusKind::infer(&name);
                ItemStatus::new(name, kind)
            }
            Some(WireStatus::Object { status, kind }) => ItemStatus::new(
                status,
                kind.as_deref()
                    .map(StatusKind::from_label)
                    .unwrap_or_default(),
            ),
            None => ItemStatus::default(),
        };

        let tags = wire
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|tag| match tag {
                WireTag::Plain(name) | WireTag::Object { name } => name,
            })
            .filter(|name| !name.trim().is_empty())
            .collect();

        Self {
            id: wire.id,
            name: wire.name,
            description: wire.description.unwrap_or_default(),
            status,
            tags,
            priority: wire.priority.and_then(WirePriority::resolve),
            parent_id: wire.parent.filter(|p| !p.is_empty()),
        }
    }
}

/// Body of a create request
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct NewItem {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ItemId>,
}

/// Body of a partial update. Absent fields are left untouched remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ItemChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// `Some(None)` detaches the item from its parent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Option<ItemId>>,
}

impl ItemChanges {
    pub fn is_empty(&self) -> bool {
        self == &ItemChanges::default()
    }
}

/// One page of a collection listing
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPage {
    pub items: Vec<RemoteItem>,
    /// `Some(true)` when the server flags this page as the last one
    pub last_page: Option<bool>,
}
