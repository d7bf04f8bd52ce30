use std::fmt;

use serde::{Deserialize, Serialize};

/// Reachability verdict for a single location, as published to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationState {
    Reachable,
    Unreachable,
    /// The query failed or was cancelled before producing a verdict.
    Unknown,
    /// The owning component opted out of periodic checking.
    Excluded,
}

impl fmt::Display for LocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LocationState::Reachable => "reachable",
            LocationState::Unreachable => "unreachable",
            LocationState::Unknown => "unknown",
            LocationState::Excluded => "excluded",
        };
        f.write_str(s)
    }
}

/// Identifies a location within a component of the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationKey {
    pub component: String,
    pub location: String,
}

impl LocationKey {
    pub fn new(component: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.location)
    }
}

/// Which engine instance a query should run on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EngineTarget {
    /// Use the registry's default instance.
    #[default]
    Default,
    /// Use the instance with this name.
    Named(String),
}

impl From<Option<String>> for EngineTarget {
    fn from(name: Option<String>) -> Self {
        match name {
            Some(n) => EngineTarget::Named(n),
            None => EngineTarget::Default,
        }
    }
}
