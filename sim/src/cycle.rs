//! The clock sequencer.
//!
//! This is the main control loop of the simulator: it sweeps a fixed
//! table of timing-signal combinations, forty half-pulse-times per add
//! cycle, and hands each nonzero combination to every registered
//! clocked unit in a fixed registration order.  As with the real
//! machine the clock can be single stepped for debugging, and a test
//! mode runs a specified number of add cycles and then halts, to
//! support regression runs.
//!
//! The original clock circuits fanned pulses out electrically; here a
//! plain function call per unit keeps execution on one thread and
//! fully deterministic.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};

use serde::Serialize;
use tracing::{event, Level};

use base::SignalSet;

use crate::alarm::Alarm;

/// Anything driven by the pulse train.  `pulse` is invoked once per
/// nonzero phase per add cycle; it must not block except through the
/// handshake primitive.
pub trait ClockedUnit {
    fn name(&self) -> String;
    fn pulse(&self, signals: SignalSet) -> Result<(), Alarm>;
}

/// Number of half-pulse-times per add cycle.  Due to the phase shift
/// of 9P there are 40 distinct phases though only 20 pulse times.
pub const PHASES_PER_CYCLE: usize = 40;

/// Phase index at which a raised clear gate substitutes the
/// selective-clear signal for the (quiescent) table entry.
pub const SELECTIVE_CLEAR_PHASE: usize = 32;

/// The basic pulse train, one entry per half-pulse-time.
///
/// This table is part of the wire-compatible contract: the skew of 9P
/// against 10P and the exact placement of the 1'P, CCG, RP and CPP
/// pulses encode physical timing relationships, so it must be
/// reproduced bit-for-bit, not rederived from its groupings.
pub const PHASES: [SignalSet; PHASES_PER_CYCLE] = [
    SignalSet::EMPTY,
    SignalSet::TENP, // 0
    SignalSet::ONEP.union(SignalSet::NINEP),
    SignalSet::TENP, // 1
    SignalSet::TWOP.union(SignalSet::NINEP),
    SignalSet::TENP, // 2
    SignalSet::TWOP.union(SignalSet::NINEP),
    SignalSet::TENP, // 3
    SignalSet::TWOPP.union(SignalSet::NINEP),
    SignalSet::TENP, // 4
    SignalSet::TWOPP.union(SignalSet::NINEP),
    SignalSet::TENP, // 5
    SignalSet::FOURP.union(SignalSet::NINEP),
    SignalSet::TENP, // 6
    SignalSet::FOURP.union(SignalSet::NINEP),
    SignalSet::TENP, // 7
    SignalSet::FOURP.union(SignalSet::NINEP),
    SignalSet::TENP, // 8
    SignalSet::FOURP.union(SignalSet::NINEP),
    SignalSet::TENP, // 9
    SignalSet::ONEPP,
    SignalSet::EMPTY, // 10
    SignalSet::CCG,
    SignalSet::EMPTY, // 11
    SignalSet::EMPTY,
    SignalSet::EMPTY, // 12
    SignalSet::RP,
    SignalSet::EMPTY, // 13
    SignalSet::EMPTY,
    SignalSet::EMPTY, // 14
    SignalSet::EMPTY,
    SignalSet::EMPTY, // 15
    SignalSet::EMPTY,
    SignalSet::EMPTY, // 16
    SignalSet::CPP,
    SignalSet::EMPTY, // 17
    SignalSet::EMPTY,
    SignalSet::EMPTY, // 18
    SignalSet::RP,
    SignalSet::EMPTY, // 19
];

/// Clock operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunMode {
    /// Run one phase pair, then wait for a step.
    OnePulse,
    /// Run one full add cycle, then wait for a step.
    OneAdd,
    /// Run continuously.
    Continuous,
    /// Run for the configured number of add cycles, then stop.
    Test,
}

enum Command {
    SetMode(RunMode),
    SetTestCycles(u64),
    Step(SyncSender<()>),
    Stop,
}

/// Thread-safe control handle for a running sequencer: mode changes,
/// step requests and stop all rendezvous with the clock at the start
/// of the nearest pulse.
#[derive(Clone)]
pub struct CycleHandle {
    tx: Sender<Command>,
}

impl CycleHandle {
    pub fn set_mode(&self, mode: RunMode) {
        let _ = self.tx.send(Command::SetMode(mode));
    }

    pub fn set_test_cycles(&self, cycles: u64) {
        let _ = self.tx.send(Command::SetTestCycles(cycles));
    }

    /// Requests one unit of work in a single-step mode and blocks
    /// until the clock has performed it.
    pub fn step(&self) {
        let (ack, done) = sync_channel(0);
        if self.tx.send(Command::Step(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }
}

/// The clock generator and dispatcher.
pub struct Cycle {
    units: Vec<Rc<dyn ClockedUnit>>,
    clear_gate: Box<dyn Fn() -> bool>,
    mode: RunMode,
    test_cycles: u64,
    test_target: u64,
    add_cycle: u64,
    phase: usize,
    stop: bool,
    commands: Receiver<Command>,
    /// Step requests taken off the command channel but not yet
    /// performed.  A step must only be acknowledged once its unit of
    /// work has been dispatched.
    pending_steps: VecDeque<SyncSender<()>>,
}

impl Cycle {
    /// Creates a sequencer with the given selective-clear gate (owned
    /// by the initiating collaborator) and a control handle for it.
    pub fn new(clear_gate: Box<dyn Fn() -> bool>) -> (Cycle, CycleHandle) {
        let (tx, rx) = channel();
        (
            Cycle {
                units: Vec::new(),
                clear_gate,
                mode: RunMode::Continuous,
                test_cycles: 0,
                test_target: 0,
                add_cycle: 0,
                phase: 0,
                stop: false,
                commands: rx,
                pending_steps: VecDeque::new(),
            },
            CycleHandle { tx },
        )
    }

    /// Registers a clocked unit.  Registration order is dispatch
    /// order and is significant for determinism.
    pub fn register(&mut self, unit: Rc<dyn ClockedUnit>) {
        self.units.push(unit);
    }

    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RunMode) {
        event!(Level::DEBUG, ?mode, "clock mode");
        self.mode = mode;
        if mode == RunMode::Test {
            self.test_target = self.add_cycle + self.test_cycles;
        }
        if !self.stepping() {
            self.release_pending_steps();
        }
    }

    pub fn set_test_cycles(&mut self, cycles: u64) {
        self.test_cycles = cycles;
        self.test_target = self.add_cycle + cycles;
    }

    /// The add cycles completed so far.
    #[must_use]
    pub fn add_cycle_count(&self) -> u64 {
        self.add_cycle
    }

    /// Current phase of the pulse train, 0..40.
    #[must_use]
    pub fn phase_index(&self) -> usize {
        self.phase
    }

    fn stepping(&self) -> bool {
        matches!(self.mode, RunMode::OnePulse | RunMode::OneAdd)
    }

    /// Forwards the basic pulse train to each unit until stopped, a
    /// test run completes, or a unit raises an alarm.
    pub fn run(&mut self) -> Result<(), Alarm> {
        self.stop = false;
        if self.mode == RunMode::Test {
            self.test_target = self.add_cycle + self.test_cycles;
        }
        loop {
            if self.mode == RunMode::Test && self.add_cycle >= self.test_target {
                event!(Level::DEBUG, cycles = self.add_cycle, "test run complete");
                return Ok(());
            }
            let cycle_ack = if self.mode == RunMode::OneAdd {
                self.await_step()
            } else {
                None
            };
            if self.stop {
                return Ok(());
            }
            for pair in 0..PHASES_PER_CYCLE / 2 {
                self.drain_commands();
                let pulse_ack = if self.mode == RunMode::OnePulse {
                    self.await_step()
                } else {
                    None
                };
                if self.stop {
                    return Ok(());
                }
                self.dispatch_phase(2 * pair)?;
                self.dispatch_phase(2 * pair + 1)?;
                if let Some(ack) = pulse_ack {
                    let _ = ack.send(());
                }
            }
            self.add_cycle += 1;
            if let Some(ack) = cycle_ack {
                let _ = ack.send(());
            }
        }
    }

    fn dispatch_phase(&mut self, index: usize) -> Result<(), Alarm> {
        self.phase = index;
        let signals = if index == SELECTIVE_CLEAR_PHASE && (self.clear_gate)() {
            SignalSet::SCG
        } else {
            PHASES[index]
        };
        if signals.is_empty() {
            return Ok(());
        }
        for unit in &self.units {
            if let Err(alarm) = unit.pulse(signals) {
                event!(Level::ERROR, unit = %unit.name(), %alarm, "halting");
                return Err(alarm);
            }
        }
        Ok(())
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SetMode(mode) => self.set_mode(mode),
            Command::SetTestCycles(cycles) => self.set_test_cycles(cycles),
            // In a single-step mode the request is queued until its
            // unit of work has actually been dispatched; anywhere else
            // a step is a no-op and is acknowledged straight away.
            Command::Step(ack) => {
                if self.stepping() && !self.stop {
                    self.pending_steps.push_back(ack);
                } else {
                    let _ = ack.send(());
                }
            }
            Command::Stop => {
                self.stop = true;
                self.release_pending_steps();
            }
        }
    }

    fn release_pending_steps(&mut self) {
        for ack in self.pending_steps.drain(..) {
            let _ = ack.send(());
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    /// Blocks until a step request is available, applying any other
    /// control commands in the meantime.  Returns `None` if the mode
    /// left single-stepping, a stop was requested, or every control
    /// handle is gone (which would otherwise block forever).
    fn await_step(&mut self) -> Option<SyncSender<()>> {
        while self.stepping() && !self.stop {
            if let Some(ack) = self.pending_steps.pop_front() {
                return Some(ack);
            }
            match self.commands.recv() {
                Err(_) => self.stop = true,
                Ok(command) => self.apply(command),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::thread;

    struct Recorder {
        seen: RefCell<Vec<SignalSet>>,
    }

    impl Recorder {
        fn new() -> Rc<Recorder> {
            Rc::new(Recorder {
                seen: RefCell::new(Vec::new()),
            })
        }
    }

    impl ClockedUnit for Recorder {
        fn name(&self) -> String {
            "recorder".to_string()
        }
        fn pulse(&self, signals: SignalSet) -> Result<(), Alarm> {
            self.seen.borrow_mut().push(signals);
            Ok(())
        }
    }

    fn test_cycle(cycles: u64) -> (Cycle, Rc<Recorder>) {
        let (mut cycle, _handle) = Cycle::new(Box::new(|| false));
        let recorder = Recorder::new();
        cycle.register(Rc::clone(&recorder) as Rc<dyn ClockedUnit>);
        cycle.set_test_cycles(cycles);
        cycle.set_mode(RunMode::Test);
        (cycle, recorder)
    }

    #[test]
    fn one_add_cycle_dispatches_the_exact_pulse_train() {
        let (mut cycle, recorder) = test_cycle(1);
        cycle.run().unwrap();
        let expected: Vec<SignalSet> = PHASES
            .iter()
            .copied()
            .filter(|p| !p.is_empty())
            .collect();
        assert_eq!(*recorder.seen.borrow(), expected);
        assert_eq!(cycle.add_cycle_count(), 1);
    }

    #[test]
    fn quiescent_phases_are_not_dispatched() {
        let (mut cycle, recorder) = test_cycle(1);
        cycle.run().unwrap();
        assert!(recorder.seen.borrow().iter().all(|p| !p.is_empty()));
        // 10 TENP + 9 digit pulses + 1'P + CCG + 2 RP + CPP.
        assert_eq!(recorder.seen.borrow().len(), 24);
    }

    #[test]
    fn zero_cycle_test_run_does_nothing() {
        let (mut cycle, recorder) = test_cycle(0);
        cycle.run().unwrap();
        assert_eq!(cycle.add_cycle_count(), 0);
        assert!(recorder.seen.borrow().is_empty());
    }

    #[test]
    fn bounded_test_run_stops_at_the_target() {
        let (mut cycle, _recorder) = test_cycle(50);
        cycle.run().unwrap();
        assert_eq!(cycle.add_cycle_count(), 50);
        // A second run goes another 50 from where we are.
        cycle.run().unwrap();
        assert_eq!(cycle.add_cycle_count(), 100);
    }

    #[test]
    fn raised_clear_gate_substitutes_the_selective_clear_signal() {
        let (mut cycle, _handle) = Cycle::new(Box::new(|| true));
        let recorder = Recorder::new();
        cycle.register(Rc::clone(&recorder) as Rc<dyn ClockedUnit>);
        cycle.set_test_cycles(1);
        cycle.set_mode(RunMode::Test);
        cycle.run().unwrap();
        let seen = recorder.seen.borrow();
        let scg: Vec<SignalSet> = seen
            .iter()
            .copied()
            .filter(|p| p.contains(SignalSet::SCG))
            .collect();
        assert_eq!(scg, vec![SignalSet::SCG]);
    }

    struct Faulty;

    impl ClockedUnit for Faulty {
        fn name(&self) -> String {
            "faulty".to_string()
        }
        fn pulse(&self, _signals: SignalSet) -> Result<(), Alarm> {
            Err(Alarm::PulseOnDisabledJack {
                jack: "x.in".to_string(),
            })
        }
    }

    #[test]
    fn an_alarm_aborts_the_sweep() {
        let (mut cycle, _handle) = Cycle::new(Box::new(|| false));
        cycle.register(Rc::new(Faulty));
        cycle.set_test_cycles(5);
        cycle.set_mode(RunMode::Test);
        assert!(cycle.run().is_err());
        assert_eq!(cycle.add_cycle_count(), 0);
    }

    #[test]
    fn single_pulse_mode_waits_for_each_step() {
        let (mut cycle, handle) = Cycle::new(Box::new(|| false));
        let recorder = Recorder::new();
        cycle.register(Rc::clone(&recorder) as Rc<dyn ClockedUnit>);
        cycle.set_mode(RunMode::OnePulse);
        let controller = thread::spawn(move || {
            // Two phase pairs: [empty, TENP] then [1P+9P, TENP].
            handle.step();
            handle.step();
            handle.stop();
        });
        cycle.run().unwrap();
        controller.join().unwrap();
        assert_eq!(
            *recorder.seen.borrow(),
            vec![
                SignalSet::TENP,
                SignalSet::ONEP | SignalSet::NINEP,
                SignalSet::TENP,
            ]
        );
    }

    #[test]
    fn every_step_advances_exactly_one_phase_pair() {
        let (mut cycle, handle) = Cycle::new(Box::new(|| false));
        let recorder = Recorder::new();
        cycle.register(Rc::clone(&recorder) as Rc<dyn ClockedUnit>);
        cycle.set_mode(RunMode::OnePulse);
        let controller = thread::spawn(move || {
            // Back-to-back steps: a request often lands while the
            // clock is still between phase pairs, and must not be
            // acknowledged until its pair has been dispatched.
            for _ in 0..40 {
                handle.step();
            }
            handle.stop();
        });
        cycle.run().unwrap();
        controller.join().unwrap();
        // 40 phase pairs are two full add cycles.
        assert_eq!(cycle.add_cycle_count(), 2);
        assert_eq!(recorder.seen.borrow().len(), 48);
    }

    #[test]
    fn one_add_mode_runs_whole_cycles_per_step() {
        let (mut cycle, handle) = Cycle::new(Box::new(|| false));
        let recorder = Recorder::new();
        cycle.register(Rc::clone(&recorder) as Rc<dyn ClockedUnit>);
        cycle.set_mode(RunMode::OneAdd);
        let controller = thread::spawn(move || {
            handle.step();
            handle.step();
            handle.stop();
        });
        cycle.run().unwrap();
        controller.join().unwrap();
        assert_eq!(cycle.add_cycle_count(), 2);
        assert_eq!(recorder.seen.borrow().len(), 48);
    }
}
