// src/analysis/core.rs

//! Pure analysis scheduler state machine.
//!
//! [`AnalysisCore`] consumes [`AnalysisEvent`]s and returns the commands the
//! async shell (`analysis::runtime`) must carry out. It owns the debounce
//! deadline, the phase and the epoch counter, and performs no IO: time only
//! enters through the instants carried by events, so every transition can be
//! tested without Tokio.

use std::time::{Duration, Instant};

/// Where the scheduler currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPhase {
    Idle,
    /// A change was seen; waiting for the quiet period to elapse.
    Debouncing,
    /// Queries of `epoch` are being dispatched.
    Running { epoch: u64 },
    /// The run of `stale` is being torn down; `next` starts once it is.
    Cancelling { stale: u64, next: u64 },
}

impl AnalysisPhase {
    /// Epoch whose workers may still be alive.
    pub fn active_epoch(&self) -> Option<u64> {
        match *self {
            AnalysisPhase::Running { epoch } => Some(epoch),
            AnalysisPhase::Cancelling { stale, .. } => Some(stale),
            AnalysisPhase::Idle | AnalysisPhase::Debouncing => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisEvent {
    /// The model was edited at `at`.
    ModelChanged { at: Instant },
    /// The debounce timer armed earlier expired; `at` is the current time.
    TimerFired { at: Instant },
    /// All workers of `epoch` have been stopped.
    CancelComplete { epoch: u64 },
    /// Every query of `epoch` has produced its verdict.
    RunFinished { epoch: u64 },
    ShutdownRequested,
}

/// Work for the IO shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisCommand {
    /// (Re)arm the single debounce timer.
    ArmTimer { deadline: Instant },
    /// Stop every worker of `epoch`, then report `CancelComplete`.
    CancelRun { epoch: u64 },
    /// Snapshot the model and dispatch one query per eligible location.
    StartRun { epoch: u64 },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AnalysisStep {
    pub commands: Vec<AnalysisCommand>,
    pub keep_running: bool,
}

impl AnalysisStep {
    fn continue_with(commands: Vec<AnalysisCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    pub debounce: Duration,
    /// Stop once a run finishes and no change is pending (`--once`).
    pub exit_when_idle: bool,
}

#[derive(Debug)]
pub struct AnalysisCore {
    options: AnalysisOptions,
    phase: AnalysisPhase,
    deadline: Option<Instant>,
    /// Latest epoch handed out; 0 before the first run.
    epoch: u64,
    runs_started: u64,
}

impl AnalysisCore {
    pub fn new(options: AnalysisOptions) -> Self {
        Self {
            options,
            phase: AnalysisPhase::Idle,
            deadline: None,
            epoch: 0,
            runs_started: 0,
        }
    }

    pub fn phase(&self) -> AnalysisPhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started
    }

    /// Pending debounce deadline, if a change is waiting to be analysed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn step(&mut self, event: AnalysisEvent) -> AnalysisStep {
        match event {
            AnalysisEvent::ModelChanged { at } => self.on_model_changed(at),
            AnalysisEvent::TimerFired { at } => self.on_timer(at),
            AnalysisEvent::CancelComplete { epoch } => self.on_cancel_complete(epoch),
            AnalysisEvent::RunFinished { epoch } => self.on_run_finished(epoch),
            AnalysisEvent::ShutdownRequested => {
                let commands = self
                    .phase
                    .active_epoch()
                    .map(|epoch| AnalysisCommand::CancelRun { epoch })
                    .into_iter()
                    .collect();
                self.deadline = None;
                self.phase = AnalysisPhase::Idle;
                AnalysisStep {
                    commands,
                    keep_running: false,
                }
            }
        }
    }

    fn on_model_changed(&mut self, at: Instant) -> AnalysisStep {
        let deadline = at + self.options.debounce;
        self.deadline = Some(deadline);
        if self.phase == AnalysisPhase::Idle {
            self.phase = AnalysisPhase::Debouncing;
        }
        // A run in progress keeps going until the quiet period ends.
        AnalysisStep::continue_with(vec![AnalysisCommand::ArmTimer { deadline }])
    }

    fn on_timer(&mut self, at: Instant) -> AnalysisStep {
        match self.deadline {
            Some(deadline) if at >= deadline => {}
            // Re-armed since this timer was set.
            _ => return AnalysisStep::continue_with(Vec::new()),
        }
        self.deadline = None;

        match self.phase {
            AnalysisPhase::Idle | AnalysisPhase::Debouncing => {
                let epoch = self.next_epoch();
                self.phase = AnalysisPhase::Running { epoch };
                self.runs_started += 1;
                AnalysisStep::continue_with(vec![AnalysisCommand::StartRun { epoch }])
            }
            AnalysisPhase::Running { epoch: stale } => {
                let next = self.next_epoch();
                self.phase = AnalysisPhase::Cancelling { stale, next };
                AnalysisStep::continue_with(vec![AnalysisCommand::CancelRun { epoch: stale }])
            }
            // The run about to start will see the latest model anyway.
            AnalysisPhase::Cancelling { .. } => AnalysisStep::continue_with(Vec::new()),
        }
    }

    fn on_cancel_complete(&mut self, epoch: u64) -> AnalysisStep {
        match self.phase {
            AnalysisPhase::Cancelling { stale, next } if stale == epoch => {
                self.phase = AnalysisPhase::Running { epoch: next };
                self.runs_started += 1;
                AnalysisStep::continue_with(vec![AnalysisCommand::StartRun { epoch: next }])
            }
            _ => AnalysisStep::continue_with(Vec::new()),
        }
    }

    fn on_run_finished(&mut self, epoch: u64) -> AnalysisStep {
        if self.phase != (AnalysisPhase::Running { epoch }) {
            return AnalysisStep::continue_with(Vec::new());
        }

        if self.deadline.is_some() {
            self.phase = AnalysisPhase::Debouncing;
            return AnalysisStep::continue_with(Vec::new());
        }

        self.phase = AnalysisPhase::Idle;
        AnalysisStep {
            commands: Vec::new(),
            keep_running: !self.options.exit_when_idle,
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn core() -> AnalysisCore {
        AnalysisCore::new(AnalysisOptions {
            debounce: DEBOUNCE,
            exit_when_idle: false,
        })
    }

    fn ms(base: Instant, n: u64) -> Instant {
        base + Duration::from_millis(n)
    }

    #[test]
    fn burst_of_changes_starts_one_run_after_last() {
        let t0 = Instant::now();
        let mut c = core();

        for i in 0..10 {
            c.step(AnalysisEvent::ModelChanged { at: ms(t0, i * 20) });
        }
        assert_eq!(c.phase(), AnalysisPhase::Debouncing);
        assert_eq!(c.deadline(), Some(ms(t0, 180 + 500)));

        // The timer armed for the first change is stale by now.
        let early = c.step(AnalysisEvent::TimerFired { at: ms(t0, 500) });
        assert!(early.commands.is_empty());

        let fired = c.step(AnalysisEvent::TimerFired { at: ms(t0, 680) });
        assert_eq!(fired.commands, vec![AnalysisCommand::StartRun { epoch: 1 }]);
        assert_eq!(c.runs_started(), 1);
    }

    #[test]
    fn change_during_run_cancels_then_restarts() {
        let t0 = Instant::now();
        let mut c = core();
        c.step(AnalysisEvent::ModelChanged { at: t0 });
        c.step(AnalysisEvent::TimerFired { at: ms(t0, 500) });
        assert_eq!(c.phase(), AnalysisPhase::Running { epoch: 1 });

        c.step(AnalysisEvent::ModelChanged { at: ms(t0, 600) });
        assert_eq!(c.phase(), AnalysisPhase::Running { epoch: 1 });

        let fired = c.step(AnalysisEvent::TimerFired { at: ms(t0, 1100) });
        assert_eq!(fired.commands, vec![AnalysisCommand::CancelRun { epoch: 1 }]);
        assert_eq!(c.phase(), AnalysisPhase::Cancelling { stale: 1, next: 2 });

        // The old run's completion arriving late is ignored.
        assert!(c.step(AnalysisEvent::RunFinished { epoch: 1 }).commands.is_empty());

        let resumed = c.step(AnalysisEvent::CancelComplete { epoch: 1 });
        assert_eq!(resumed.commands, vec![AnalysisCommand::StartRun { epoch: 2 }]);
        assert_eq!(c.phase(), AnalysisPhase::Running { epoch: 2 });
    }

    #[test]
    fn finished_run_with_pending_change_goes_back_to_debouncing() {
        let t0 = Instant::now();
        let mut c = core();
        c.step(AnalysisEvent::ModelChanged { at: t0 });
        c.step(AnalysisEvent::TimerFired { at: ms(t0, 500) });
        c.step(AnalysisEvent::ModelChanged { at: ms(t0, 550) });
        c.step(AnalysisEvent::RunFinished { epoch: 1 });
        assert_eq!(c.phase(), AnalysisPhase::Debouncing);

        let fired = c.step(AnalysisEvent::TimerFired { at: ms(t0, 1050) });
        assert_eq!(fired.commands, vec![AnalysisCommand::StartRun { epoch: 2 }]);
    }

    #[test]
    fn once_mode_exits_after_first_idle() {
        let t0 = Instant::now();
        let mut c = AnalysisCore::new(AnalysisOptions {
            debounce: DEBOUNCE,
            exit_when_idle: true,
        });
        c.step(AnalysisEvent::ModelChanged { at: t0 });
        c.step(AnalysisEvent::TimerFired { at: ms(t0, 500) });
        let done = c.step(AnalysisEvent::RunFinished { epoch: 1 });
        assert!(!done.keep_running);
        assert_eq!(c.phase(), AnalysisPhase::Idle);
    }

    #[test]
    fn shutdown_cancels_active_run() {
        let t0 = Instant::now();
        let mut c = core();
        c.step(AnalysisEvent::ModelChanged { at: t0 });
        c.step(AnalysisEvent::TimerFired { at: ms(t0, 500) });

        let step = c.step(AnalysisEvent::ShutdownRequested);
        assert!(!step.keep_running);
        assert_eq!(step.commands, vec![AnalysisCommand::CancelRun { epoch: 1 }]);
    }
}
