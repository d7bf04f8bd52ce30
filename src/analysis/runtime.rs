// src/analysis/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::analysis::core::{AnalysisCommand, AnalysisCore, AnalysisEvent, AnalysisOptions};
use crate::analysis::model::{LocationStateSink, ModelSource};
use crate::analysis::worker::LocationCheck;
use crate::analysis::{AnalysisSettings, AnalysisSignal, AnalysisStatus};
use crate::dispatch::{EpochTag, QueryDispatcher};
use crate::types::{LocationKey, LocationState};

/// Workers and not-yet-started checks of one epoch.
struct ActiveRun {
    epoch: u64,
    token: CancellationToken,
    pending: VecDeque<LocationKey>,
    workers: JoinSet<()>,
}

/// Coordinator task driving [`AnalysisCore`].
///
/// It is the only writer of the current epoch. Everything it does happens on
/// one task, so a run is always fully torn down before the next one starts.
pub struct AnalysisRuntime {
    core: AnalysisCore,
    settings: AnalysisSettings,
    signals: mpsc::UnboundedReceiver<AnalysisSignal>,
    dispatcher: Arc<QueryDispatcher>,
    source: Arc<dyn ModelSource>,
    sink: Arc<dyn LocationStateSink>,
    current_epoch: Arc<AtomicU64>,
    status: watch::Sender<AnalysisStatus>,
    run: Option<ActiveRun>,
}

impl fmt::Debug for AnalysisRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRuntime")
            .field("core", &self.core)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AnalysisRuntime {
    pub(crate) fn new(
        settings: AnalysisSettings,
        signals: mpsc::UnboundedReceiver<AnalysisSignal>,
        dispatcher: Arc<QueryDispatcher>,
        source: Arc<dyn ModelSource>,
        sink: Arc<dyn LocationStateSink>,
        status: watch::Sender<AnalysisStatus>,
    ) -> Self {
        let mut settings = settings;
        if settings.worker_pool_size == 0 {
            warn!("worker_pool_size is 0; running checks one at a time");
            settings.worker_pool_size = 1;
        }
        let core = AnalysisCore::new(AnalysisOptions {
            debounce: settings.debounce,
            exit_when_idle: settings.exit_when_idle,
        });
        Self {
            core,
            settings,
            signals,
            dispatcher,
            source,
            sink,
            current_epoch: Arc::new(AtomicU64::new(0)),
            status,
            run: None,
        }
    }

    pub async fn run(mut self) {
        info!(
            debounce_ms = self.settings.debounce.as_millis() as u64,
            workers = self.settings.worker_pool_size,
            "analysis scheduler started"
        );

        loop {
            let deadline = self.core.deadline().map(Instant::from_std);

            let event = tokio::select! {
                signal = self.signals.recv() => match signal {
                    Some(AnalysisSignal::ModelChanged { at }) => {
                        AnalysisEvent::ModelChanged { at: at.into_std() }
                    }
                    Some(AnalysisSignal::Shutdown) | None => AnalysisEvent::ShutdownRequested,
                },
                _ = wait_deadline(deadline) => AnalysisEvent::TimerFired { at: Instant::now().into_std() },
                exit = next_worker_exit(&mut self.run) => {
                    log_worker_exit(exit);
                    match self.refill() {
                        Some(epoch) => AnalysisEvent::RunFinished { epoch },
                        None => continue,
                    }
                }
                _ = sleep(self.settings.idle_tick) => {
                    self.reap();
                    continue;
                }
            };

            if !self.apply(event).await {
                break;
            }
        }

        if let Some(run) = self.run.take() {
            self.cancel_run(run).await;
        }
        info!(runs = self.core.runs_started(), "analysis scheduler stopped");
    }

    /// Feed `event` and any follow-up events through the core.
    async fn apply(&mut self, event: AnalysisEvent) -> bool {
        let mut events = VecDeque::from([event]);
        let mut keep_running = true;

        while let Some(event) = events.pop_front() {
            trace!(?event, "analysis event");
            let step = self.core.step(event);
            // Publish before acting so stale results are recognised as soon
            // as a cancellation begins.
            self.current_epoch.store(self.core.epoch(), Ordering::Release);

            for command in step.commands {
                if let Some(follow_up) = self.execute(command).await {
                    events.push_back(follow_up);
                }
            }
            keep_running &= step.keep_running;
            self.publish_status();
        }

        keep_running
    }

    async fn execute(&mut self, command: AnalysisCommand) -> Option<AnalysisEvent> {
        match command {
            // The deadline is read back from the core on every loop turn.
            AnalysisCommand::ArmTimer { .. } => None,
            AnalysisCommand::CancelRun { epoch } => {
                if let Some(run) = self.run.take() {
                    self.cancel_run(run).await;
                }
                Some(AnalysisEvent::CancelComplete { epoch })
            }
            AnalysisCommand::StartRun { epoch } => self.start_run(epoch),
        }
    }

    fn start_run(&mut self, epoch: u64) -> Option<AnalysisEvent> {
        let snapshot = match self.source.snapshot() {
            Ok(s) => s,
            Err(e) => {
                warn!(epoch, error = %format!("{e:#}"), "could not snapshot model; skipping run");
                return Some(AnalysisEvent::RunFinished { epoch });
            }
        };

        let plan = snapshot.plan();
        for key in &plan.excluded {
            self.sink.update(key, LocationState::Excluded);
        }

        info!(
            epoch,
            queries = plan.queries.len(),
            excluded = plan.excluded.len(),
            "analysis run started"
        );

        self.run = Some(ActiveRun {
            epoch,
            token: CancellationToken::new(),
            pending: plan.queries.into(),
            workers: JoinSet::new(),
        });
        self.refill()
            .map(|epoch| AnalysisEvent::RunFinished { epoch })
    }

    /// Start pending checks up to the worker limit. Returns the epoch if the
    /// run has nothing left to do.
    fn refill(&mut self) -> Option<u64> {
        let run = self.run.as_mut()?;

        while run.workers.len() < self.settings.worker_pool_size {
            let Some(key) = run.pending.pop_front() else {
                break;
            };
            let check = LocationCheck {
                key,
                target: self.settings.target.clone(),
                tag: EpochTag::new(run.epoch, Arc::clone(&self.current_epoch)),
                token: run.token.clone(),
                dispatcher: Arc::clone(&self.dispatcher),
                sink: Arc::clone(&self.sink),
            };
            run.workers.spawn(check.run());
        }

        if run.workers.is_empty() && run.pending.is_empty() {
            let epoch = run.epoch;
            self.run = None;
            debug!(epoch, "analysis run finished");
            return Some(epoch);
        }
        None
    }

    /// Stop every worker of `run` and wait for them to exit.
    async fn cancel_run(&self, mut run: ActiveRun) {
        debug!(
            epoch = run.epoch,
            active = run.workers.len(),
            pending = run.pending.len(),
            "cancelling analysis run"
        );
        run.token.cancel();
        for key in run.pending.drain(..) {
            self.sink.update(&key, LocationState::Unknown);
        }
        while let Some(exit) = run.workers.join_next().await {
            log_worker_exit(Some(exit));
        }
    }

    /// Drop bookkeeping for workers that already exited.
    fn reap(&mut self) {
        let Some(run) = self.run.as_mut() else {
            trace!("analysis idle tick");
            return;
        };
        let mut reaped = 0usize;
        while let Some(exit) = run.workers.try_join_next() {
            log_worker_exit(Some(exit));
            reaped += 1;
        }
        if reaped > 0 {
            trace!(epoch = run.epoch, reaped, "reaped finished workers");
        }
    }

    fn publish_status(&self) {
        let status = AnalysisStatus {
            phase: self.core.phase(),
            epoch: self.core.epoch(),
            runs_started: self.core.runs_started(),
        };
        self.status.send_replace(status);
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn next_worker_exit(run: &mut Option<ActiveRun>) -> Option<Result<(), JoinError>> {
    match run {
        Some(r) if !r.workers.is_empty() => r.workers.join_next().await,
        _ => std::future::pending().await,
    }
}

fn log_worker_exit(exit: Option<Result<(), JoinError>>) {
    if let Some(Err(e)) = exit {
        if e.is_panic() {
            warn!(error = %e, "analysis worker panicked");
        }
    }
}
