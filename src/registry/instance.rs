// src/registry/instance.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default arguments for a local engine; `{port}` is substituted per connection.
pub const DEFAULT_LOCAL_ARGS: &[&str] = &["-p", "127.0.0.1:{port}"];

/// A configured verification backend.
///
/// This is also the persisted record: an editor can serialize a list of these
/// into its preference store and hand them back to
/// [`EngineRegistry::replace_instances`](super::EngineRegistry::replace_instances).
///
/// ```toml
/// [[engine]]
/// name = "Reveaal"
/// local = true
/// path = "/opt/ecdar/lib/Reveaal"
/// port_start = 5040
/// port_end = 5042
/// thread_safe = false
/// default = true
/// ```
///
/// Ports are stored as `u32` so that out-of-range values survive
/// deserialization and are reported by validation instead of a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInstance {
    pub name: String,

    /// Spawn a local executable (`true`) or connect to `address` (`false`).
    #[serde(rename = "local", default)]
    pub is_local: bool,

    /// Remote host or IP; required when not local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Engine binary; required when local.
    #[serde(rename = "path", default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,

    #[serde(rename = "port_start")]
    pub port_range_start: u32,

    #[serde(rename = "port_end")]
    pub port_range_end: u32,

    /// Whether one engine process may serve several concurrent queries.
    #[serde(rename = "thread_safe", default)]
    pub is_thread_safe: bool,

    #[serde(rename = "default", default)]
    pub is_default: bool,

    /// Packaged instances: location fields cannot be changed by the user.
    #[serde(rename = "locked", default)]
    pub is_locked: bool,

    /// Arguments for local engines. `{port}` is replaced with the chosen port.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Optional regex; when set, a local engine is only connected to after a
    /// stdout line matches it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_pattern: Option<String>,
}

fn default_args() -> Vec<String> {
    DEFAULT_LOCAL_ARGS.iter().map(|s| s.to_string()).collect()
}

impl EngineInstance {
    /// A local engine spawned from `path`.
    pub fn local(name: impl Into<String>, path: impl Into<PathBuf>, ports: (u32, u32)) -> Self {
        Self {
            name: name.into(),
            is_local: true,
            address: None,
            executable_path: Some(path.into()),
            port_range_start: ports.0,
            port_range_end: ports.1,
            is_thread_safe: false,
            is_default: false,
            is_locked: false,
            args: default_args(),
            ready_pattern: None,
        }
    }

    /// A remote engine reachable at `address`.
    pub fn remote(name: impl Into<String>, address: impl Into<String>, ports: (u32, u32)) -> Self {
        Self {
            name: name.into(),
            is_local: false,
            address: Some(address.into()),
            executable_path: None,
            port_range_start: ports.0,
            port_range_end: ports.1,
            is_thread_safe: false,
            is_default: false,
            is_locked: false,
            args: default_args(),
            ready_pattern: None,
        }
    }

    /// Maximum number of simultaneous connections this instance allows.
    ///
    /// Non-thread-safe engines get exactly one strictly serialized connection;
    /// thread-safe engines may use every port in their range.
    pub fn concurrency_budget(&self) -> usize {
        if !self.is_thread_safe {
            return 1;
        }
        self.port_count()
    }

    /// Number of ports in the inclusive range, 0 if the range is inverted.
    pub fn port_count(&self) -> usize {
        if self.port_range_end < self.port_range_start {
            0
        } else {
            (self.port_range_end - self.port_range_start) as usize + 1
        }
    }

    /// The validated port range as `u16`s, or `None` when out of bounds.
    pub fn port_range(&self) -> Option<(u16, u16)> {
        let start = u16::try_from(self.port_range_start).ok()?;
        let end = u16::try_from(self.port_range_end).ok()?;
        (start <= end).then_some((start, end))
    }

    /// Whether the user-visible location (locality, path, address) differs.
    pub fn location_differs(&self, other: &EngineInstance) -> bool {
        self.is_local != other.is_local
            || self.executable_path != other.executable_path
            || self.address != other.address
    }

    /// Arguments with `{port}` substituted.
    pub fn args_for_port(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }
}
