//! Decimal digit storage and digit-line encodings.
//!
//! A data trunk carries eleven lines: ten digit lines (bit 0 is the
//! units decade) and the PM line (bit 10) which signals sign.  A digit
//! d is transmitted as d consecutive pulses on its line, so within the
//! simulator a single transmission is just the bitmask of lines which
//! pulse at that half-pulse-time.
//!
//! Register contents are held as ten BCD decades packed one nibble
//! each into a single wide word, least significant decade in the low
//! nibble.  Carry resolution works on whole words at a time using the
//! usual sixes-correction trick for parallel decimal addition.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::signal::SignalSet;

/// Mask of the ten digit lines of a data trunk value.
pub const DIGIT_LINES: u16 = 0x3ff;

/// The PM (sign) line of a data trunk value.
pub const PM_LINE: u16 = 1 << 10;

/// How many decades a register holds.
pub const DECADES: usize = 10;

/// Digits zero to nine as combinations of the 1P/2P/2'P/4P/9P pulses.
/// Units which encode digits directly as pulse combinations (constant
/// transmission, function tables) index this table.
pub const DIGIT_PULSES: [SignalSet; 10] = [
    SignalSet::EMPTY,
    SignalSet::ONEP,
    SignalSet::TWOP,
    SignalSet::ONEP.union(SignalSet::TWOP),
    SignalSet::FOURP,
    SignalSet::ONEP.union(SignalSet::FOURP),
    SignalSet::TWOP.union(SignalSet::FOURP),
    SignalSet::ONEP.union(SignalSet::TWOP).union(SignalSet::FOURP),
    SignalSet::TWOP.union(SignalSet::TWOPP).union(SignalSet::FOURP),
    SignalSet::ONEP
        .union(SignalSet::TWOP)
        .union(SignalSet::TWOPP)
        .union(SignalSet::FOURP),
];

const DECADE_MASK: u64 = (1 << (4 * DECADES)) - 1;
const NIBBLE_LSBS: u64 = 0x11_1111_1111;
const SIXES: u64 = 0x66_6666_6666;

/// Place bit i of `mask` at the low bit of nibble i, turning a
/// per-decade bitmask into a packed-BCD addend of ones.
#[must_use]
pub fn spread(mask: u16) -> u64 {
    let mut out = 0u64;
    for i in 0..DECADES {
        if mask & (1 << i) != 0 {
            out |= 1 << (4 * i);
        }
    }
    out
}

fn squeeze(nibble_lsbs: u64) -> u16 {
    let mut out = 0u16;
    for i in 0..DECADES {
        if nibble_lsbs >> (4 * i) & 1 == 1 {
            out |= 1 << i;
        }
    }
    out
}

/// Ten packed BCD decades.  Valid instances always hold a digit 0-9 in
/// every nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Decades(u64);

impl Decades {
    pub const ZERO: Decades = Decades(0);

    /// Builds a register image from per-decade digits, least
    /// significant first.  Digits must be 0-9.
    #[must_use]
    pub fn from_digits(digits: [u8; DECADES]) -> Decades {
        let mut word = 0u64;
        for (i, d) in digits.iter().enumerate() {
            debug_assert!(*d <= 9);
            word |= u64::from(*d) << (4 * i);
        }
        Decades(word)
    }

    #[must_use]
    pub fn digit(self, i: usize) -> u8 {
        ((self.0 >> (4 * i)) & 0xf) as u8
    }

    #[must_use]
    pub fn digits(self) -> [u8; DECADES] {
        let mut out = [0u8; DECADES];
        for (i, d) in out.iter_mut().enumerate() {
            *d = self.digit(i);
        }
        out
    }

    #[must_use]
    pub fn set_digit(self, i: usize, d: u8) -> Decades {
        debug_assert!(d <= 9);
        Decades(self.0 & !(0xf << (4 * i)) | u64::from(d) << (4 * i))
    }

    /// Adds one to every decade selected by `mask`, without carrying
    /// between decades.  A decade passing from 9 back to 0 is flagged
    /// in the returned carry mask.  This is the action of a digit-line
    /// pulse on the decade counters: each counter steps independently
    /// and overflow is remembered in the decade's carry flip-flop for
    /// later ripple.
    #[must_use]
    pub fn count(self, mask: u16) -> (Decades, u16) {
        let sum = self.0 + spread(mask);
        // A decade can only reach 10 here, never 11-15, so 0b1010 is
        // the sole overflow pattern.
        let wrapped = (sum >> 3) & (sum >> 1) & NIBBLE_LSBS;
        (Decades(sum - ((wrapped << 3) | (wrapped << 1))), squeeze(wrapped))
    }

    /// The cyclic counting step: adds one to all ten decades at once.
    #[must_use]
    pub fn count_all(self) -> (Decades, u16) {
        self.count(DIGIT_LINES)
    }

    /// Full parallel decimal addition of a packed-BCD `addend`, with
    /// carries chained between decades.  The returned mask flags the
    /// decades which carried out; bit 9 set means the carry escaped
    /// the most significant decade.
    #[must_use]
    pub fn add(self, addend: u64) -> (Decades, u16) {
        debug_assert_eq!(addend & !DECADE_MASK, 0);
        let t1 = self.0 + SIXES;
        let t2 = t1 + addend;
        // Binary carries into each bit position; the bits at nibble
        // boundaries are the decimal carries.
        let binary_carries = t2 ^ t1 ^ addend;
        let boundaries = NIBBLE_LSBS << 4;
        let no_carry = !binary_carries & boundaries;
        // Decades which did not carry picked up a spurious 6; take it
        // back out.
        let fix = (no_carry >> 2) | (no_carry >> 3);
        let sum = (t2 - fix) & DECADE_MASK;
        (Decades(sum), squeeze((binary_carries & boundaries) >> 4))
    }

    /// Packs a signed value into sign-plus-decades form using the
    /// ten's complement convention: negative values are stored as
    /// 10^10 + v with the sign flag raised.  `v` must satisfy
    /// |v| <= 9,999,999,999.
    #[must_use]
    pub fn from_signed(v: i64) -> (bool, Decades) {
        debug_assert!(v.unsigned_abs() <= 9_999_999_999);
        let (sign, mut magnitude) = if v < 0 {
            (true, (10_000_000_000 + v) as u64)
        } else {
            (false, v as u64)
        };
        let mut word = 0u64;
        for i in 0..DECADES {
            word |= (magnitude % 10) << (4 * i);
            magnitude /= 10;
        }
        (sign, Decades(word))
    }

    /// Reads back the signed value of a sign-plus-decades register.
    #[must_use]
    pub fn to_signed(self, sign: bool) -> i64 {
        let mut magnitude = 0i64;
        for i in (0..DECADES).rev() {
            magnitude = magnitude * 10 + i64::from(self.digit(i));
        }
        if sign {
            magnitude - 10_000_000_000
        } else {
            magnitude
        }
    }
}

impl Display for Decades {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        for i in (0..DECADES).rev() {
            write!(f, "{}", self.digit(i))?;
        }
        Ok(())
    }
}
