// src/analysis/mod.rs

//! Periodic Analysis Scheduler.
//!
//! Turns a stream of "model changed" signals into debounced analysis runs:
//! after a quiet period the current run (if any) is cancelled, the model is
//! snapshotted and one reachability query per eligible location is dispatched
//! through a bounded set of workers.
//!
//! The state machine lives in [`core`]; the coordinator task that owns the
//! timer, the workers and the epoch counter is in [`runtime`].

pub mod core;
pub mod model;
pub mod runtime;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::dispatch::QueryDispatcher;
use crate::types::EngineTarget;

pub use self::core::{AnalysisCore, AnalysisPhase};
pub use model::{
    reachability_query, ComponentSnapshot, LocationStateSink, ModelSnapshot, ModelSource,
    TomlModelSource,
};
pub use runtime::AnalysisRuntime;

/// Tunables of the analysis loop.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Quiet period before a run starts.
    pub debounce: Duration,
    /// Wake-up interval of the coordinator while nothing happens.
    pub idle_tick: Duration,
    /// Maximum checks in flight per run. Zero is treated as one.
    pub worker_pool_size: usize,
    /// Engine instance the checks run on.
    pub target: EngineTarget,
    /// Stop after the first run that leaves nothing pending.
    pub exit_when_idle: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            idle_tick: Duration::from_secs(2),
            worker_pool_size: 10,
            target: EngineTarget::Default,
            exit_when_idle: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum AnalysisSignal {
    ModelChanged { at: Instant },
    Shutdown,
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisStatus {
    pub phase: AnalysisPhase,
    /// Latest epoch handed out.
    pub epoch: u64,
    pub runs_started: u64,
}

impl Default for AnalysisStatus {
    fn default() -> Self {
        Self {
            phase: AnalysisPhase::Idle,
            epoch: 0,
            runs_started: 0,
        }
    }
}

/// Control handle of a running scheduler.
#[derive(Debug)]
pub struct AnalysisHandle {
    signals: mpsc::UnboundedSender<AnalysisSignal>,
    status: watch::Receiver<AnalysisStatus>,
    task: Option<JoinHandle<()>>,
}

impl AnalysisHandle {
    /// Spawn the coordinator on the current runtime.
    pub fn spawn(
        settings: AnalysisSettings,
        dispatcher: Arc<QueryDispatcher>,
        source: Arc<dyn ModelSource>,
        sink: Arc<dyn LocationStateSink>,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(AnalysisStatus::default());
        let runtime = AnalysisRuntime::new(settings, signals_rx, dispatcher, source, sink, status_tx);
        let task = tokio::spawn(runtime.run());
        Self {
            signals: signals_tx,
            status: status_rx,
            task: Some(task),
        }
    }

    /// Record a structural model edit. Never blocks.
    pub fn notify_model_changed(&self) {
        send_model_changed(&self.signals);
    }

    /// Cloneable sender for change notifications, e.g. for a file watcher.
    pub fn notifier(&self) -> ModelChangeNotifier {
        ModelChangeNotifier {
            signals: self.signals.clone(),
        }
    }

    pub fn status(&self) -> AnalysisStatus {
        *self.status.borrow()
    }

    /// Receiver that sees every status change.
    pub fn subscribe(&self) -> watch::Receiver<AnalysisStatus> {
        self.status.clone()
    }

    /// Whether the coordinator has exited (e.g. after a `--once` run).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the coordinator to exit on its own. Cancel-safe.
    pub async fn wait(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        let res = task.await;
        self.task = None;
        if let Err(e) = res {
            warn!(error = %e, "analysis scheduler task failed");
        }
    }

    /// Cancel the active run and stop the coordinator.
    pub async fn shutdown(mut self) {
        let _ = self.signals.send(AnalysisSignal::Shutdown);
        self.wait().await;
    }
}

#[derive(Debug, Clone)]
pub struct ModelChangeNotifier {
    signals: mpsc::UnboundedSender<AnalysisSignal>,
}

impl ModelChangeNotifier {
    pub fn notify_model_changed(&self) {
        send_model_changed(&self.signals);
    }
}

fn send_model_changed(signals: &mpsc::UnboundedSender<AnalysisSignal>) {
    let signal = AnalysisSignal::ModelChanged { at: Instant::now() };
    if signals.send(signal).is_err() {
        warn!("analysis scheduler has stopped; change ignored");
    }
}
