// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::EngineInstance;

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [scheduler]
/// debounce_ms = 500
/// worker_pool_size = 10
///
/// [packaged]
/// install_dir = "/opt/ecdar"
///
/// [[engine]]
/// name = "Reveaal"
/// local = true
/// path = "/opt/ecdar/lib/Reveaal"
/// port_start = 5040
/// port_end = 5042
/// ```
///
/// All sections are optional. Use `ConfigFile::try_from` to validate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub packaged: PackagedSection,

    #[serde(default, rename = "engine")]
    pub engines: Vec<EngineInstance>,
}

/// `[scheduler]` section: timing and sizing of the query machinery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerSection {
    /// Quiet period before a periodic analysis run starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,

    /// Bounded number of analysis checks in flight at once.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// How long validation waits for a remote engine host to accept a
    /// connection.
    #[serde(default = "default_reachability_timeout_ms")]
    pub reachability_timeout_ms: u64,

    /// Limit for a local engine to start and accept its first connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_idle_tick_ms() -> u64 {
    2000
}

fn default_worker_pool_size() -> usize {
    10
}

fn default_reachability_timeout_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            idle_tick_ms: default_idle_tick_ms(),
            worker_pool_size: default_worker_pool_size(),
            reachability_timeout_ms: default_reachability_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl SchedulerSection {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// `[packaged]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackagedSection {
    /// Application install directory to scan for bundled engines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
}

/// Statically validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holders can rely on
/// sane scheduler values and well-formed, uniquely named engines.
/// Environment checks (executables present, hosts reachable) happen later,
/// when the engines are installed into the registry.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub packaged: PackagedSection,
    #[serde(rename = "engine")]
    pub engines: Vec<EngineInstance>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerSection,
        packaged: PackagedSection,
        engines: Vec<EngineInstance>,
    ) -> Self {
        Self {
            scheduler,
            packaged,
            engines,
        }
    }
}
