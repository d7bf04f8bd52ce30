// src/registry/mod.rs

//! Engine Instance Registry.
//!
//! Holds the active set of engine instances. The set is read-mostly and only
//! ever replaced as a whole: [`EngineRegistry::replace_instances`] validates
//! every candidate first and swaps the `Arc` only if all of them pass.

pub mod instance;
pub mod packaged;
pub mod validate;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::{QueryError, ValidationReport};
use crate::fs::FileSystem;
use crate::types::EngineTarget;

pub use instance::EngineInstance;
pub use packaged::{discover_packaged, lock_instance, merge_packaged, PackagedEngine};

/// Immutable snapshot of the active instances.
pub type InstanceSet = Arc<Vec<Arc<EngineInstance>>>;

#[derive(Debug)]
pub struct EngineRegistry {
    active: RwLock<InstanceSet>,
    fs: Arc<dyn FileSystem>,
    reachability_timeout: Duration,
}

impl EngineRegistry {
    /// An empty registry. Until instances are installed it is degraded and
    /// every query fails with [`QueryError::NoEngineConfigured`].
    pub fn new(fs: Arc<dyn FileSystem>, reachability_timeout: Duration) -> Self {
        Self {
            active: RwLock::new(Arc::new(Vec::new())),
            fs,
            reachability_timeout,
        }
    }

    /// Validate `instances` and, only if all of them pass, make them the
    /// active set. Returns the new set.
    ///
    /// On failure the previous set is left untouched.
    pub async fn replace_instances(
        &self,
        instances: Vec<EngineInstance>,
    ) -> Result<InstanceSet, ValidationReport> {
        let previous = self.snapshot();
        let report = validate::validate_instances(
            &previous,
            &instances,
            self.fs.as_ref(),
            self.reachability_timeout,
        )
        .await;

        if !report.is_empty() {
            warn!(
                issues = report.issues.len(),
                "rejecting engine instance replacement"
            );
            return Err(report);
        }

        let next: InstanceSet = Arc::new(instances.into_iter().map(Arc::new).collect());
        {
            let mut guard = self.active.write().unwrap_or_else(|e| e.into_inner());
            *guard = Arc::clone(&next);
        }

        let names: Vec<&str> = next.iter().map(|i| i.name.as_str()).collect();
        info!(?names, "engine instances replaced");
        if next.is_empty() {
            warn!("no engine instances configured; queries cannot run");
        }
        Ok(next)
    }

    /// Current instance set.
    pub fn snapshot(&self) -> InstanceSet {
        let guard = self.active.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// The instance flagged default, else the first one, else `None`.
    pub fn default_instance(&self) -> Option<Arc<EngineInstance>> {
        let set = self.snapshot();
        set.iter()
            .find(|i| i.is_default)
            .or_else(|| set.first())
            .cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<EngineInstance>> {
        self.snapshot().iter().find(|i| i.name == name).cloned()
    }

    /// `true` when no instances are configured.
    pub fn is_degraded(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Resolve a query target against the active set.
    pub fn resolve(&self, target: &EngineTarget) -> Result<Arc<EngineInstance>, QueryError> {
        match target {
            EngineTarget::Default => self.default_instance().ok_or(QueryError::NoEngineConfigured),
            EngineTarget::Named(name) => {
                if self.is_degraded() {
                    return Err(QueryError::NoEngineConfigured);
                }
                self.get(name).ok_or_else(|| {
                    QueryError::ConnectionUnavailable(format!("unknown engine instance '{name}'"))
                })
            }
        }
    }
}
