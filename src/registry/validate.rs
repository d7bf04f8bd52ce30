// src/registry/validate.rs

//! Engine instance validation.
//!
//! Split in two layers:
//! - [`static_problems`] needs no IO and is shared with config loading.
//! - [`validate_instances`] adds duplicate-name, locked-instance and
//!   environment checks (executable present, remote host reachable) and is
//!   what `replace_instances` runs before swapping the active set.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use crate::errors::{InstanceIssue, ValidationReport};
use crate::fs::FileSystem;
use crate::registry::EngineInstance;

const MAX_PORT: u32 = u16::MAX as u32;

/// Problems detectable from the record alone.
pub fn static_problems(inst: &EngineInstance) -> Vec<String> {
    let mut problems = Vec::new();

    if inst.name.trim().is_empty() {
        problems.push("name must not be blank".to_string());
    }

    if inst.port_range_start > MAX_PORT {
        problems.push(format!(
            "port_start {} is outside [0, {MAX_PORT}]",
            inst.port_range_start
        ));
    }
    if inst.port_range_end > MAX_PORT {
        problems.push(format!(
            "port_end {} is outside [0, {MAX_PORT}]",
            inst.port_range_end
        ));
    }
    if inst.port_range_start > inst.port_range_end {
        problems.push(format!(
            "port range {}..={} is decreasing",
            inst.port_range_start, inst.port_range_end
        ));
    }

    if inst.is_local {
        match &inst.executable_path {
            Some(p) if !p.as_os_str().is_empty() => {}
            _ => problems.push("local engine requires an executable path".to_string()),
        }
    } else {
        match &inst.address {
            Some(a) if !a.trim().is_empty() => {}
            _ => problems.push("remote engine requires an address".to_string()),
        }
    }

    if let Some(pattern) = &inst.ready_pattern {
        if let Err(e) = Regex::new(pattern) {
            problems.push(format!("invalid ready_pattern '{pattern}': {e}"));
        }
    }

    problems
}

/// Names that appear more than once in `instances`.
pub fn duplicate_names(instances: &[EngineInstance]) -> Vec<InstanceIssue> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for inst in instances {
        *seen.entry(inst.name.as_str()).or_default() += 1;
    }

    let mut dups: Vec<_> = seen
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(name, n)| InstanceIssue::new(name, format!("name is used by {n} instances")))
        .collect();
    dups.sort_by(|a, b| a.instance.cmp(&b.instance));
    dups
}

/// At most one instance may carry the default flag; every extra one is reported.
pub fn extra_defaults(instances: &[EngineInstance]) -> Vec<InstanceIssue> {
    instances
        .iter()
        .filter(|i| i.is_default)
        .skip(1)
        .map(|i| InstanceIssue::new(&i.name, "another instance is already marked default"))
        .collect()
}

/// A locked instance cannot have its location changed by a replacement.
pub fn locked_violations(
    previous: &[std::sync::Arc<EngineInstance>],
    next: &[EngineInstance],
) -> Vec<InstanceIssue> {
    next.iter()
        .filter_map(|inst| {
            let old = previous.iter().find(|p| p.name == inst.name)?;
            (old.is_locked && old.location_differs(inst)).then(|| {
                InstanceIssue::new(
                    &inst.name,
                    "instance is locked; its locality, path and address cannot be changed",
                )
            })
        })
        .collect()
}

/// Environment checks: the executable exists (local) or the host answers (remote).
///
/// Network problems are reported as issues, never as errors.
pub async fn environment_problems(
    inst: &EngineInstance,
    fs: &dyn FileSystem,
    reachability_timeout: Duration,
) -> Vec<String> {
    if inst.is_local {
        let Some(path) = &inst.executable_path else {
            return Vec::new();
        };
        if !fs.exists(path) {
            return vec![format!("executable {:?} does not exist", path)];
        }
        if !fs.is_executable(path) {
            return vec![format!("{:?} is not an executable file", path)];
        }
        return Vec::new();
    }

    let (Some(address), Some((port, _))) = (&inst.address, inst.port_range()) else {
        return Vec::new();
    };

    match check_reachable(address, port, reachability_timeout).await {
        Ok(()) => Vec::new(),
        Err(problem) => vec![problem],
    }
}

async fn check_reachable(address: &str, port: u16, limit: Duration) -> Result<(), String> {
    let target = format!("{address}:{port}");

    let mut addrs = match timeout(limit, lookup_host(target.as_str())).await {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => return Err(format!("address '{address}' does not resolve: {e}")),
        Err(_) => return Err(format!("resolving '{address}' timed out after {limit:?}")),
    };

    let Some(addr) = addrs.next() else {
        return Err(format!("address '{address}' resolved to no hosts"));
    };

    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            debug!(%target, "remote engine reachable");
            Ok(())
        }
        Ok(Err(e)) => Err(format!("{target} is unreachable: {e}")),
        Err(_) => Err(format!("{target} did not answer within {limit:?}")),
    }
}

/// Run every check over `next`, collecting all issues.
pub async fn validate_instances(
    previous: &[std::sync::Arc<EngineInstance>],
    next: &[EngineInstance],
    fs: &dyn FileSystem,
    reachability_timeout: Duration,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for issue in duplicate_names(next) {
        report.push(issue);
    }
    for issue in extra_defaults(next) {
        report.push(issue);
    }
    for issue in locked_violations(previous, next) {
        report.push(issue);
    }

    for inst in next {
        let problems = static_problems(inst);
        if !problems.is_empty() {
            // Environment checks on a malformed record would only add noise.
            for p in problems {
                report.push(InstanceIssue::new(&inst.name, p));
            }
            continue;
        }
        for p in environment_problems(inst, fs, reachability_timeout).await {
            report.push(InstanceIssue::new(&inst.name, p));
        }
    }

    report
}
