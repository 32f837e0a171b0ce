use crate::desired::item::DesiredItem;
use crate::remote::types::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Remote ids to close rather than delete, with the reason recorded on close
pub type DuplicateSet = BTreeMap<ItemId, String>;

#[derive(Debug, thiserror::Error)]
pub enum DesiredStateError {
    #[error("Failed to read desired state from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse desired state {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Unsupported desired state format for {0} (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),
    #[error("Invalid desired state: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub id: ItemId,
    #[serde(default = "default_duplicate_reason")]
    pub reason: String,
}

fn default_duplicate_reason() -> String {
    "duplicate".to_string()
}

/// The desired forest plus the caller's duplicate set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<DuplicateEntry>,
    #[serde(default)]
    pub items: Vec<DesiredItem>,
}

impl DesiredState {
    pub fn new(items: Vec<DesiredItem>) -> Self {
        Self {
            duplicates: Vec::new(),
            items,
        }
    }

    pub fn with_duplicate(mut self, id: impl Into<ItemId>, reason: impl Into<String>) -> Self {
        self.duplicates.push(DuplicateEntry {
            id: id.into(),
            reason: reason.into(),
        });
        self
    }

    /// Load from a `.toml` or `.json` file, chosen by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DesiredStateError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| DesiredStateError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let parsed: Result<Self, String> = match extension.as_deref() {
            Some("toml") => toml::from_str(&content).map_err(|e| e.to_string()),
            Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
            _ => return Err(DesiredStateError::UnsupportedFormat(path.to_path_buf())),
        };

        let mut state = parsed.map_err(|message| DesiredStateError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        state.prepare()?;

        debug!(
            "Loaded desired state from {}: {} top-level items, {} duplicates",
            path.display(),
            state.items.len(),
            state.duplicates.len()
        );
        Ok(state)
    }

    /// Validate structure and expand tier decorations
    pub fn prepare(&mut self) -> Result<(), DesiredStateError> {
        for item in &self.items {
            validate(item, true)?;
        }
        for item in &mut self.items {
            item.apply_tier();
        }
        Ok(())
    }

    /// Duplicate entries merged over `base`; file entries win on conflict
    pub fn duplicate_set(&self, base: &DuplicateSet) -> DuplicateSet {
        let mut set = base.clone();
        for entry in &self.duplicates {
            set.insert(entry.id.clone(), entry.reason.clone());
        }
        set
    }

    /// Total number of declared items
    pub fn len(&self) -> usize {
        self.items.iter().map(DesiredItem::subtree_len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn validate(item: &DesiredItem, top_level: bool) -> Result<(), DesiredStateError> {
    if item.name.trim().is_empty() {
        return Err(DesiredStateError::Invalid(
            "every item needs a non-empty name".to_string(),
        ));
    }
    if !top_level && item.parent.is_some() {
        return Err(DesiredStateError::Invalid(format!(
            "'{}' sets `parent` but is nested; only top-level items may attach to a remote parent",
            item.name
        )));
    }
    if !top_level && item.tier.is_some() {
        return Err(DesiredStateError::Invalid(format!(
            "'{}' sets `tier` but is nested; stories inherit the tier of their epic",
            item.name
        )));
    }
    for child in &item.children {
        validate(child, false)?;
    }
    Ok(())
}
