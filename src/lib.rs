// src/lib.rs

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod service;
pub mod types;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisSettings, LocationStateSink, TomlModelSource};
use crate::cli::CliArgs;
use crate::config::{engines_with_packaged, load_and_validate, ConfigFile};
use crate::dispatch::{QueryRequest, QueryResult};
use crate::errors::SchedError;
use crate::exec::RealConnector;
use crate::fs::{FileSystem, RealFileSystem};
use crate::registry::EngineInstance;
use crate::service::QueryService;
use crate::types::{EngineTarget, LocationKey, LocationState};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and packaged-engine discovery
/// - registry / pool / dispatcher (`QueryService`)
/// - one-shot queries (`--query`)
/// - periodic analysis of a model file, with a file watcher unless `--once`
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let engines = engines_with_packaged(&cfg, fs.as_ref())?;

    let connector = Arc::new(RealConnector::new(cfg.scheduler.connect_timeout()));
    let service = QueryService::new(&cfg.scheduler, Arc::clone(&fs), connector);

    let installed = service
        .replace_instances(engines.clone())
        .await
        .map_err(SchedError::Validation);

    if args.dry_run {
        print_dry_run(&args.config, &cfg, &engines);
        installed?;
        println!("engine instances are valid");
        return Ok(());
    }

    let installed = installed?;
    if installed.is_empty() {
        warn!("no engine instances configured; every query will fail");
    }

    let target = EngineTarget::from(args.engine.clone());
    let outcome = if !args.queries.is_empty() {
        run_queries(&service, &args.queries, &target).await
    } else if let Some(model) = &args.model {
        run_analysis(&service, &cfg, model, fs, target, args.once).await
    } else {
        info!("nothing to do: pass --query or --model");
        Ok(())
    };

    service.close_all();
    outcome
}

/// Submit every query up front, then print results in submission order.
async fn run_queries(service: &QueryService, queries: &[String], target: &EngineTarget) -> Result<()> {
    let receivers: Vec<(String, oneshot::Receiver<QueryResult>)> = queries
        .iter()
        .map(|q| {
            let (tx, rx) = oneshot::channel();
            let request = QueryRequest::new(q.clone(), move |res| {
                let _ = tx.send(res);
            })
            .target(target.clone());
            service.submit(request);
            (q.clone(), rx)
        })
        .collect();

    let mut failed = 0usize;
    for (query, rx) in receivers {
        match rx.await {
            Ok(Ok(resp)) => {
                let verdict = if resp.satisfied { "satisfied" } else { "not satisfied" };
                if resp.message.is_empty() {
                    println!("{query}: {verdict}");
                } else {
                    println!("{query}: {verdict} ({})", resp.message);
                }
            }
            Ok(Err(err)) => {
                failed += 1;
                println!("{query}: error: {err}");
            }
            Err(_) => {
                failed += 1;
                println!("{query}: error: no result");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} queries failed", queries.len());
    }
    Ok(())
}

async fn run_analysis(
    service: &QueryService,
    cfg: &ConfigFile,
    model: &Path,
    fs: Arc<dyn FileSystem>,
    target: EngineTarget,
    once: bool,
) -> Result<()> {
    let mut settings = AnalysisSettings::from_scheduler(&cfg.scheduler, target);
    settings.exit_when_idle = once;

    let source = Arc::new(TomlModelSource::new(model, Arc::clone(&fs)));
    let sink: Arc<dyn LocationStateSink> = Arc::new(print_location_state);
    let mut handle = service.spawn_analysis(settings, source, sink);

    // Analyse the model as it is right now.
    handle.notify_model_changed();

    let _watcher = if once {
        None
    } else {
        let notifier = handle.notifier();
        Some(watch::spawn_model_watcher(model, fs, move || {
            notifier.notify_model_changed()
        })?)
    };

    tokio::select! {
        _ = handle.wait() => {
            debug!(status = ?handle.status(), "analysis finished");
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "failed to listen for Ctrl+C; stopping");
            }
            info!("shutdown requested");
            service.close_all();
            handle.shutdown().await;
        }
    }
    Ok(())
}

fn print_location_state(key: &LocationKey, state: LocationState) {
    println!("{key}: {state}");
}

/// Simple dry-run output: print every engine instance that would be used.
fn print_dry_run(config_path: &Path, cfg: &ConfigFile, engines: &[EngineInstance]) {
    println!("enginesched dry-run ({})", config_path.display());
    println!("  scheduler.debounce_ms = {}", cfg.scheduler.debounce_ms);
    println!("  scheduler.worker_pool_size = {}", cfg.scheduler.worker_pool_size);
    if let Some(dir) = &cfg.packaged.install_dir {
        println!("  packaged.install_dir = {}", dir.display());
    }
    println!();

    println!("engines ({}):", engines.len());
    for inst in engines {
        let mut flags = Vec::new();
        if inst.is_default {
            flags.push("default");
        }
        if inst.is_locked {
            flags.push("locked");
        }
        if inst.is_thread_safe {
            flags.push("thread-safe");
        }
        println!("  - {} [{}]", inst.name, flags.join(", "));
        match (&inst.executable_path, &inst.address) {
            (Some(path), _) if inst.is_local => println!("      path: {}", path.display()),
            (_, Some(addr)) => println!("      address: {addr}"),
            _ => {}
        }
        println!(
            "      ports: {}..={} (max {} connection(s))",
            inst.port_range_start,
            inst.port_range_end,
            inst.concurrency_budget()
        );
    }
}
