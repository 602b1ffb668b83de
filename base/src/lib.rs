//! The `base` crate defines the machine-value primitives which are
//! useful both in the simulator and in other associated tools (for
//! example a wiring-diagram checker would depend on the digit and
//! signal encodings but not on the simulator library itself).

pub mod digits;
pub mod signal;

pub use digits::{spread, Decades, DECADES, DIGIT_LINES, DIGIT_PULSES, PM_LINE};
pub use signal::SignalSet;
