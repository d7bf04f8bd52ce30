// src/analysis/model.rs

//! Model snapshots and reachability query generation.
//!
//! The editor owns the live model; the scheduler only ever sees an immutable
//! [`ModelSnapshot`] taken at the start of each run. The CLI reads snapshots
//! from a TOML file:
//!
//! ```toml
//! [[component]]
//! name = "Machine"
//! include_in_periodic_check = true
//! locations = ["L0", "L1", "L2"]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fs::FileSystem;
use crate::types::{LocationKey, LocationState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub name: String,
    #[serde(default = "default_include")]
    pub include_in_periodic_check: bool,
    #[serde(default)]
    pub locations: Vec<String>,
}

fn default_include() -> bool {
    true
}

impl ComponentSnapshot {
    pub fn new<I, S>(name: impl Into<String>, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            include_in_periodic_check: true,
            locations: locations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excluded(mut self) -> Self {
        self.include_in_periodic_check = false;
        self
    }

    pub fn location_keys(&self) -> impl Iterator<Item = LocationKey> + '_ {
        self.locations
            .iter()
            .map(|loc| LocationKey::new(self.name.clone(), loc.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentSnapshot>,
}

impl ModelSnapshot {
    pub fn new(components: Vec<ComponentSnapshot>) -> Self {
        Self { components }
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing model snapshot")
    }

    /// Split the model into locations to query and locations to mark
    /// excluded, in model order.
    pub fn plan(&self) -> AnalysisPlan {
        let mut plan = AnalysisPlan::default();
        for component in &self.components {
            let target = if component.include_in_periodic_check {
                &mut plan.queries
            } else {
                &mut plan.excluded
            };
            target.extend(component.location_keys());
        }
        plan
    }
}

/// Work derived from one snapshot.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AnalysisPlan {
    pub queries: Vec<LocationKey>,
    pub excluded: Vec<LocationKey>,
}

/// Engine query text asking whether `key` is reachable.
pub fn reachability_query(key: &LocationKey) -> String {
    format!("reachability: {}.{}", key.component, key.location)
}

/// Produces the snapshot used for query generation.
pub trait ModelSource: Send + Sync {
    fn snapshot(&self) -> Result<ModelSnapshot>;
}

impl ModelSource for ModelSnapshot {
    fn snapshot(&self) -> Result<ModelSnapshot> {
        Ok(self.clone())
    }
}

/// Reads the model from a TOML file on every snapshot.
#[derive(Debug, Clone)]
pub struct TomlModelSource {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl TomlModelSource {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelSource for TomlModelSource {
    fn snapshot(&self) -> Result<ModelSnapshot> {
        let text = self
            .fs
            .read_to_string(&self.path)
            .with_context(|| format!("reading model file {:?}", self.path))?;
        ModelSnapshot::parse(&text).with_context(|| format!("in model file {:?}", self.path))
    }
}

/// Receives per-location verdicts. This is how results become visible to
/// the editor.
pub trait LocationStateSink: Send + Sync {
    fn update(&self, key: &LocationKey, state: LocationState);
}

impl<F> LocationStateSink for F
where
    F: Fn(&LocationKey, LocationState) + Send + Sync,
{
    fn update(&self, key: &LocationKey, state: LocationState) {
        self(key, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn plan_splits_included_and_excluded_components() {
        let model = ModelSnapshot::new(vec![
            ComponentSnapshot::new("A", ["L0", "L1"]),
            ComponentSnapshot::new("B", ["L0"]).excluded(),
        ]);
        let plan = model.plan();
        assert_eq!(plan.queries, vec![LocationKey::new("A", "L0"), LocationKey::new("A", "L1")]);
        assert_eq!(plan.excluded, vec![LocationKey::new("B", "L0")]);
    }

    #[test]
    fn toml_source_reads_through_filesystem() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "/model.toml",
            r#"
[[component]]
name = "Machine"
locations = ["Idle", "Busy"]

[[component]]
name = "Spec"
include_in_periodic_check = false
locations = ["S0"]
"#,
        );
        let source = TomlModelSource::new("/model.toml", Arc::new(fs));
        let snap = source.snapshot().unwrap();
        assert_eq!(snap.components.len(), 2);
        assert!(snap.components[0].include_in_periodic_check);
        assert!(!snap.components[1].include_in_periodic_check);
    }

    #[test]
    fn missing_model_file_is_an_error() {
        let source = TomlModelSource::new("/nope.toml", Arc::new(MockFileSystem::new()));
        let err = source.snapshot().unwrap_err();
        assert!(format!("{err:#}").contains("nope.toml"));
    }

    #[test]
    fn query_text_names_component_and_location() {
        assert_eq!(
            reachability_query(&LocationKey::new("Machine", "L1")),
            "reachability: Machine.L1"
        );
    }
}
