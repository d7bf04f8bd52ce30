// src/errors.rs

//! Crate-wide error types.
//!
//! - [`SchedError`] covers configuration, validation and IO failures that are
//!   returned to the caller directly.
//! - [`QueryError`] is what a query's completion handler receives; it never
//!   escapes as a panic or an unhandled fault.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("Engine instance validation failed:\n{0}")]
    Validation(ValidationReport),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedError>;

/// One problem found while validating a single engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIssue {
    /// Name of the offending instance (may be blank if the name itself is the problem).
    pub instance: String,
    pub problem: String,
}

impl InstanceIssue {
    pub fn new(instance: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            problem: problem.into(),
        }
    }
}

impl fmt::Display for InstanceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine '{}': {}", self.instance, self.problem)
    }
}

/// Every issue found during a `replace_instances` attempt.
///
/// A report is only produced when at least one instance failed; the active
/// instance set is left untouched in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub issues: Vec<InstanceIssue>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn push(&mut self, issue: InstanceIssue) {
        self.issues.push(issue);
    }

    /// Issues reported for the named instance.
    pub fn for_instance<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a InstanceIssue> {
        self.issues.iter().filter(move |i| i.instance == name)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "  - {issue}")?;
        }
        Ok(())
    }
}

/// Why a query ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` was called on the request's handle.
    Explicit,
    /// The analysis epoch the request belonged to was superseded.
    Superseded,
    /// `close_all()` tore down the connections (e.g. instances were reconfigured).
    PoolClosed,
    /// The service is shutting down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::Explicit => "cancelled by caller",
            CancelReason::Superseded => "superseded by a newer analysis run",
            CancelReason::PoolClosed => "engine connections were closed",
            CancelReason::Shutdown => "shutting down",
        };
        f.write_str(s)
    }
}

/// Failure delivered to a query's completion handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no engine configured")]
    NoEngineConfigured,

    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("engine rejected query: {0}")]
    EngineRejected(String),

    #[error("cancelled: {0}")]
    Cancelled(CancelReason),
}

impl QueryError {
    /// Routine cancellations that callers usually should not surface to users.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled(_))
    }
}
