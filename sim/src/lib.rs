//! Pulse-level simulation kernel.
//!
//! The machine simulated here is programmed by wiring, not by stored
//! instructions: units are patched together at jacks, switches select
//! what each program control does, and a central clock drives every
//! unit through the 40-phase add cycle.  This crate provides the
//! wiring graph, the clock sequencer, the blocking handshake used by
//! independently scheduled units, and the accumulator, together with
//! the machine assembly that ties twenty accumulators to a plugboard
//! name space.

pub mod accumulator;
pub mod alarm;
pub mod cycle;
pub mod handshake;
pub mod jack;
pub mod machine;

pub use accumulator::{Accumulator, OpSet};
pub use alarm::{Alarm, AlarmKind, ConfigurationError};
pub use cycle::{
    ClockedUnit, Cycle, CycleHandle, RunMode, PHASES, PHASES_PER_CYCLE, SELECTIVE_CLEAR_PHASE,
};
pub use handshake::{wire, Pulse, Wire, WireSink};
pub use jack::{connect, Jack, JackHandler};
pub use machine::Machine;
