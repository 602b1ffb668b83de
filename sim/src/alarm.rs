//! Simulator alarms and configuration errors.
//!
//! The error taxonomy has two tiers.  [`ConfigurationError`] covers
//! mistakes in the wiring diagram or switch settings; these are
//! reported immediately to whoever is doing the configuring and the
//! simulation never starts (or continues) in an inconsistent state.
//! [`Alarm`] covers invariant violations detected during pulse
//! dispatch; they describe a physically impossible configuration, so
//! there is no meaningful recovery and the run halts with a
//! diagnostic.
//!
//! Transient signal conditions (transmitting a zero value, a transmit
//! with no connected listener) are deliberately not represented here:
//! they correspond to "no signal present" on a quiescent wire and are
//! silently suppressed at the point they arise.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// A mistake in patch-cable wiring or switch settings, reported to the
/// caller performing the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A jack cannot be patched to itself.
    SelfConnection { jack: String },
    /// The two jacks are already patched together.
    AlreadyConnected { jack1: String, jack2: String },
    /// The requested accumulator interconnection is not one of the
    /// legal complementary port pairings.
    IllegalPairing { reason: String },
    /// No jack with this name exists on the unit.
    UnknownJack { name: String },
    /// No switch with this name exists on the unit.
    UnknownSwitch { name: String },
    /// The switch exists but cannot be set to this value.
    InvalidSwitchValue { switch: String, value: String },
    /// A numeric value outside the range a unit can register.
    InvalidValue { unit: String, value: i64 },
    /// No unit with this name exists.
    UnknownUnit { name: String },
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ConfigurationError::SelfConnection { jack } => {
                write!(f, "{jack} cannot be connected to itself")
            }
            ConfigurationError::AlreadyConnected { jack1, jack2 } => {
                write!(f, "{jack1} is already connected to {jack2}")
            }
            ConfigurationError::IllegalPairing { reason } => {
                write!(f, "illegal interconnection: {reason}")
            }
            ConfigurationError::UnknownJack { name } => write!(f, "invalid jack: {name}"),
            ConfigurationError::UnknownSwitch { name } => write!(f, "invalid switch: {name}"),
            ConfigurationError::InvalidSwitchValue { switch, value } => {
                write!(f, "invalid value {value} for switch {switch}")
            }
            ConfigurationError::InvalidValue { unit, value } => {
                write!(f, "{value} does not fit in {unit}")
            }
            ConfigurationError::UnknownUnit { name } => write!(f, "invalid unit: {name}"),
        }
    }
}

impl Error for ConfigurationError {}

/// The kinds of alarm the kernel can raise during dispatch.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize)]
pub enum AlarmKind {
    ConflictingPrograms,
    PulseOnDisabledJack,
}

impl Display for AlarmKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            AlarmKind::ConflictingPrograms => "ConflictingPrograms",
            AlarmKind::PulseOnDisabledJack => "PulseOnDisabledJack",
        })
    }
}

/// A fatal invariant violation detected while dispatching pulses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alarm {
    /// Two simultaneously latched program controls resolved to
    /// incompatible operations.  This represents an invalid wiring
    /// diagram, not a runtime condition.
    ConflictingPrograms { unit: String, details: String },
    /// An input jack received a pulse while its operations were
    /// gated off.  The wire graph never delivers to disabled jacks,
    /// so this indicates an impossible wiring/program configuration.
    PulseOnDisabledJack { jack: String },
}

impl Alarm {
    #[must_use]
    pub fn kind(&self) -> AlarmKind {
        match self {
            Alarm::ConflictingPrograms { .. } => AlarmKind::ConflictingPrograms,
            Alarm::PulseOnDisabledJack { .. } => AlarmKind::PulseOnDisabledJack,
        }
    }
}

impl Display for Alarm {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Alarm::ConflictingPrograms { unit, details } => {
                write!(
                    f,
                    "conflicting program controls simultaneously latched on {unit}: {details}"
                )
            }
            Alarm::PulseOnDisabledJack { jack } => {
                write!(f, "pulse received on disabled jack {jack}")
            }
        }
    }
}

impl Error for Alarm {}
