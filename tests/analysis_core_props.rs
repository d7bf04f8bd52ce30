use std::collections::VecDeque;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use enginesched::analysis::core::{
    AnalysisCommand, AnalysisCore, AnalysisEvent, AnalysisOptions, AnalysisPhase,
};

const DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone)]
enum Op {
    /// Advance the clock, then report an edit.
    Change(u64),
    /// Advance the clock and fire the timer if it is due.
    Wait(u64),
    /// The active run (if any) finishes.
    Finish,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..300u64).prop_map(Op::Change),
        (0..1200u64).prop_map(Op::Wait),
        Just(Op::Finish),
    ]
}

/// Drives the core the way the runtime does: cancellations complete
/// synchronously and their follow-up events are fed straight back.
struct Driver {
    core: AnalysisCore,
    now: Instant,
    running: Option<u64>,
    last_started: u64,
    starts: usize,
}

impl Driver {
    fn new() -> Self {
        Self {
            core: AnalysisCore::new(AnalysisOptions {
                debounce: Duration::from_millis(DEBOUNCE_MS),
                exit_when_idle: false,
            }),
            now: Instant::now(),
            running: None,
            last_started: 0,
            starts: 0,
        }
    }

    fn feed(&mut self, event: AnalysisEvent) -> Result<(), TestCaseError> {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let step = self.core.step(event);
            for command in step.commands {
                match command {
                    AnalysisCommand::ArmTimer { deadline } => {
                        prop_assert!(deadline > self.now);
                    }
                    AnalysisCommand::CancelRun { epoch } => {
                        prop_assert_eq!(self.running, Some(epoch));
                        self.running = None;
                        queue.push_back(AnalysisEvent::CancelComplete { epoch });
                    }
                    AnalysisCommand::StartRun { epoch } => {
                        prop_assert!(self.running.is_none(), "two runs alive at once");
                        prop_assert!(epoch > self.last_started, "epoch went backwards");
                        self.running = Some(epoch);
                        self.last_started = epoch;
                        self.starts += 1;
                    }
                }
            }
        }
        prop_assert_eq!(self.core.phase().active_epoch(), self.running);
        Ok(())
    }

    fn apply(&mut self, op: &Op) -> Result<(), TestCaseError> {
        match *op {
            Op::Change(dt) => {
                self.now += Duration::from_millis(dt);
                self.feed(AnalysisEvent::ModelChanged { at: self.now })
            }
            Op::Wait(dt) => {
                self.now += Duration::from_millis(dt);
                match self.core.deadline() {
                    Some(deadline) if deadline <= self.now => {
                        self.feed(AnalysisEvent::TimerFired { at: self.now })
                    }
                    _ => Ok(()),
                }
            }
            Op::Finish => match self.running {
                Some(epoch) => {
                    self.running = None;
                    self.feed(AnalysisEvent::RunFinished { epoch })
                }
                None => Ok(()),
            },
        }
    }
}

proptest! {
    #[test]
    fn at_most_one_run_is_ever_active(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let mut driver = Driver::new();
        for op in &ops {
            driver.apply(op)?;
        }
        prop_assert_eq!(driver.core.runs_started() as usize, driver.starts);
        prop_assert_eq!(driver.core.epoch(), driver.last_started);
    }

    #[test]
    fn a_burst_inside_the_quiet_period_starts_one_run(
        gaps in proptest::collection::vec(0..DEBOUNCE_MS, 1..30)
    ) {
        let mut driver = Driver::new();
        for gap in &gaps {
            // Never due: every gap is shorter than the debounce interval.
            driver.apply(&Op::Wait(*gap))?;
            driver.apply(&Op::Change(0))?;
        }
        prop_assert_eq!(driver.starts, 0);
        prop_assert_eq!(driver.core.phase(), AnalysisPhase::Debouncing);

        driver.apply(&Op::Wait(DEBOUNCE_MS))?;
        prop_assert_eq!(driver.starts, 1);
        prop_assert_eq!(driver.core.phase(), AnalysisPhase::Running { epoch: 1 });
    }

    #[test]
    fn shutdown_cancels_whatever_is_active(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let mut driver = Driver::new();
        for op in &ops {
            driver.apply(op)?;
        }
        let active = driver.core.phase().active_epoch();
        let step = driver.core.step(AnalysisEvent::ShutdownRequested);
        prop_assert!(!step.keep_running);
        let expected: Vec<AnalysisCommand> = active
            .map(|epoch| AnalysisCommand::CancelRun { epoch })
            .into_iter()
            .collect();
        prop_assert_eq!(step.commands, expected);
    }
}
