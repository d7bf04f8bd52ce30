// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{InstanceIssue, Result, SchedError, ValidationReport};
use crate::registry::validate::{duplicate_names, extra_defaults, static_problems};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SchedError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.scheduler, raw.packaged, raw.engines))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_scheduler(cfg)?;
    validate_engines(cfg)?;
    Ok(())
}

fn validate_scheduler(cfg: &RawConfigFile) -> Result<()> {
    let s = &cfg.scheduler;

    if s.worker_pool_size == 0 {
        return Err(SchedError::ConfigError(
            "[scheduler].worker_pool_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if s.idle_tick_ms == 0 {
        return Err(SchedError::ConfigError(
            "[scheduler].idle_tick_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if s.connect_timeout_ms == 0 {
        return Err(SchedError::ConfigError(
            "[scheduler].connect_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

/// Everything about the `[[engine]]` entries that can be checked without IO.
fn validate_engines(cfg: &RawConfigFile) -> Result<()> {
    let mut report = ValidationReport::default();

    for inst in &cfg.engines {
        for problem in static_problems(inst) {
            report.push(InstanceIssue::new(&inst.name, problem));
        }
    }
    for issue in duplicate_names(&cfg.engines)
        .into_iter()
        .chain(extra_defaults(&cfg.engines))
    {
        report.push(issue);
    }

    if report.is_empty() {
        Ok(())
    } else {
        Err(SchedError::Validation(report))
    }
}
