use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority bucket encoded as a tag and a name prefix, never as structure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tier {
    Now,
    Next,
    Later,
    Custom(String),
}

impl Tier {
    pub fn label(&self) -> &str {
        match self {
            Tier::Now => "now",
            Tier::Next => "next",
            Tier::Later => "later",
            Tier::Custom(label) => label,
        }
    }

    /// `[NOW] Email Integration`
    pub fn epic_name(&self, name: &str) -> String {
        let prefix = format!("[{}]", self.label().to_uppercase());
        let name = name.trim();
        if name.starts_with(&prefix) {
            name.to_string()
        } else {
            format!("{} {}", prefix, name)
        }
    }

    pub fn epic_tags(&self) -> Vec<String> {
        vec![
            self.label().to_string(),
            "epic".to_string(),
            "roadmap".to_string(),
        ]
    }

    pub fn story_tags(&self) -> Vec<String> {
        vec![self.label().to_string(), "story".to_string()]
    }
}

impl From<String> for Tier {
    fn from(label: String) -> Self {
        match label.trim().to_lowercase().as_str() {
            "now" => Tier::Now,
            "next" => Tier::Next,
            "later" => Tier::Later,
            other => Tier::Custom(other.to_string()),
        }
    }
}

impl From<Tier> for String {
    fn from(tier: Tier) -> String {
        tier.label().to_string()
    }
}

impl FromStr for Tier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Tier::from(s.to_string()))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
