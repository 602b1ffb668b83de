//! The named timing signals which make up the machine's pulse train.
//!
//! Every add cycle the clock generator sweeps through forty
//! half-pulse-times; at each one a combination of these signals may be
//! active, and each clocked unit is handed the combination as a
//! bitmask.  The declaration order of the signals is part of the
//! wire-compatible contract and must not be rearranged.

use std::fmt::{self, Display, Formatter};
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::Serialize;

/// A set of simultaneously active timing signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize)]
pub struct SignalSet(u16);

impl SignalSet {
    /// No signal present (a quiescent half-pulse-time).
    pub const EMPTY: SignalSet = SignalSet(0);

    /// Central program pulse, used to trigger and chain the program
    /// controls of the various units.
    pub const CPP: SignalSet = SignalSet(1);
    /// Cycles the decades of an accumulator during transmission of the
    /// number (or its complement) registered in it.
    pub const TENP: SignalSet = SignalSet(1 << 1);
    /// With [`SignalSet::TWOP`], [`SignalSet::TWOPP`] and
    /// [`SignalSet::FOURP`], combinations of these pulses represent
    /// the digits zero to nine on a digit trunk.
    pub const ONEP: SignalSet = SignalSet(1 << 2);
    pub const TWOP: SignalSet = SignalSet(1 << 3);
    pub const TWOPP: SignalSet = SignalSet(1 << 4);
    pub const FOURP: SignalSet = SignalSet(1 << 5);
    /// The nine consecutive digit-transmission pulse times.
    pub const NINEP: SignalSet = SignalSet(1 << 6);
    /// The extra pulse used to obtain a complement with respect to
    /// 10^n instead of 10^n - 1.
    pub const ONEPP: SignalSet = SignalSet(1 << 7);
    /// Resets decade flip-flops and drives the carry-over process;
    /// asserted twice per add cycle.
    pub const RP: SignalSet = SignalSet(1 << 8);
    /// Carry-clear gate, controlling carry-over and program-driven
    /// clearing.
    pub const CCG: SignalSet = SignalSet(1 << 9);
    /// Selective-clear gate, dispatched in place of a quiescent
    /// half-pulse-time when the external clear gate is raised.
    pub const SCG: SignalSet = SignalSet(1 << 10);

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every signal in `other` is active in `self`.
    #[must_use]
    pub const fn contains(self, other: SignalSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any signal in `other` is active in `self`.
    #[must_use]
    pub const fn intersects(self, other: SignalSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Union of two signal sets; usable in const contexts, which
    /// `BitOr` is not.
    #[must_use]
    pub const fn union(self, other: SignalSet) -> SignalSet {
        SignalSet(self.0 | other.0)
    }

    const NAMES: [(SignalSet, &'static str); 11] = [
        (SignalSet::CPP, "CPP"),
        (SignalSet::TENP, "10P"),
        (SignalSet::ONEP, "1P"),
        (SignalSet::TWOP, "2P"),
        (SignalSet::TWOPP, "2'P"),
        (SignalSet::FOURP, "4P"),
        (SignalSet::NINEP, "9P"),
        (SignalSet::ONEPP, "1'P"),
        (SignalSet::RP, "RP"),
        (SignalSet::CCG, "CCG"),
        (SignalSet::SCG, "SCG"),
    ];
}

impl BitOr for SignalSet {
    type Output = SignalSet;
    fn bitor(self, rhs: SignalSet) -> SignalSet {
        SignalSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for SignalSet {
    fn bitor_assign(&mut self, rhs: SignalSet) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SignalSet {
    type Output = SignalSet;
    fn bitand(self, rhs: SignalSet) -> SignalSet {
        SignalSet(self.0 & rhs.0)
    }
}

impl Display for SignalSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for (signal, name) in SignalSet::NAMES {
            if self.contains(signal) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_are_distinct() {
        for (i, (a, _)) in SignalSet::NAMES.iter().enumerate() {
            for (b, _) in SignalSet::NAMES.iter().skip(i + 1) {
                assert!(!a.intersects(*b), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn display_joins_names() {
        let s = SignalSet::ONEP | SignalSet::NINEP;
        assert_eq!(s.to_string(), "1P+9P");
        assert_eq!(SignalSet::EMPTY.to_string(), "-");
    }

    #[test]
    fn contains_and_intersects() {
        let s = SignalSet::TWOP | SignalSet::NINEP;
        assert!(s.contains(SignalSet::TWOP));
        assert!(!s.contains(SignalSet::TWOP | SignalSet::CPP));
        assert!(s.intersects(SignalSet::TWOP | SignalSet::CPP));
        assert!(!s.intersects(SignalSet::RP));
    }
}
