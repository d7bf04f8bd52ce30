// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `enginesched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "enginesched",
    version,
    about = "Dispatch verification queries to engine instances and keep model reachability up to date.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Enginesched.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Model file (TOML) to analyse periodically. Watched for changes unless
    /// `--once` is given.
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Run this query, print the result and exit. May be repeated.
    #[arg(long = "query", value_name = "TEXT")]
    pub queries: Vec<String>,

    /// Engine instance to use instead of the default one.
    #[arg(long, value_name = "NAME")]
    pub engine: Option<String>,

    /// Analyse the model once, print every location's state and exit.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ENGINESCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the engine instances, but don't start any.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_queries_are_collected_in_order() {
        let args = CliArgs::try_parse_from([
            "enginesched",
            "--query",
            "reachability: A.L0",
            "--query",
            "reachability: A.L1",
            "--engine",
            "Reveaal",
        ])
        .unwrap();
        assert_eq!(args.queries, vec!["reachability: A.L0", "reachability: A.L1"]);
        assert_eq!(args.engine.as_deref(), Some("Reveaal"));
        assert_eq!(args.config, PathBuf::from("Enginesched.toml"));
    }
}
