//! The accumulator unit.
//!
//! An accumulator is a ten-decade signed decimal register with five
//! digit input ports (α β γ δ ε), two digit outputs (A for the true
//! value, S for the ten's complement) and twelve program controls.
//! Programs 1-4 run for a single add cycle; programs 5-12 carry a
//! repeat switch and an output terminal so that finishing a program
//! can trigger the next one.
//!
//! Digits arrive and leave as pulse trains: a decade receiving d
//! pulses steps its counter d times, remembering overflow in a
//! per-decade carry flip-flop.  Carries are resolved once per add
//! cycle by the ripple pass, which also crosses into the left
//! neighbour when two units are interconnected as a twenty-digit
//! register.  Transmission works by cyclically counting every decade
//! through ten and emitting a pulse on each decade's line once its
//! carry flip-flop sets, so a decade holding d pulses its line
//! exactly d times.
//!
//! The unit owns all of its register state; the sequencer's dispatch
//! order is the only writer during a run, so a `RefCell` suffices.
//! Interior borrows are always released before transmitting on a
//! jack, since a pulse may be wired straight back into this unit.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Display, Formatter};
use std::ops::{BitOr, BitOrAssign};
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::{event, Level};

use base::digits::{spread, Decades, DECADES, DIGIT_LINES, PM_LINE};
use base::SignalSet;

use crate::alarm::{Alarm, ConfigurationError};
use crate::cycle::ClockedUnit;
use crate::jack::{Jack, JackHandler};

/// Program controls per accumulator.
pub const PROGRAMS: usize = 12;

/// Programs 1-4 have no repeat switch and retire after one add cycle.
const SINGLE_CYCLE_PROGRAMS: usize = 4;

/// The set of operations an accumulator performs during one add
/// cycle, as resolved from its latched program controls (or forced by
/// an external override).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OpSet(u16);

impl OpSet {
    pub const EMPTY: OpSet = OpSet(0);
    pub const RECEIVE_ALPHA: OpSet = OpSet(1);
    pub const RECEIVE_BETA: OpSet = OpSet(1 << 1);
    pub const RECEIVE_GAMMA: OpSet = OpSet(1 << 2);
    pub const RECEIVE_DELTA: OpSet = OpSet(1 << 3);
    pub const RECEIVE_EPSILON: OpSet = OpSet(1 << 4);
    pub const TRANSMIT_ADD: OpSet = OpSet(1 << 5);
    pub const TRANSMIT_BOTH: OpSet = OpSet(1 << 6);
    pub const TRANSMIT_SUBTRACT: OpSet = OpSet(1 << 7);
    pub const CLEAR: OpSet = OpSet(1 << 8);
    pub const CORRECT: OpSet = OpSet(1 << 9);

    /// Any of the five digit input ports.
    pub const RECEIVE_ANY: OpSet = OpSet(0x1f);
    /// Any operation which transmits on A or S.
    pub const TRANSMIT_ANY: OpSet = OpSet(0b111 << 5);

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn intersects(self, other: OpSet) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: OpSet) -> OpSet {
        OpSet(self.0 | other.0)
    }
}

impl BitOr for OpSet {
    type Output = OpSet;
    fn bitor(self, rhs: OpSet) -> OpSet {
        self.union(rhs)
    }
}

impl BitOrAssign for OpSet {
    fn bitor_assign(&mut self, rhs: OpSet) {
        *self = self.union(rhs);
    }
}

const PORT_NAMES: [&str; 5] = ["α", "β", "γ", "δ", "ε"];
const PORT_OPS: [OpSet; 5] = [
    OpSet::RECEIVE_ALPHA,
    OpSet::RECEIVE_BETA,
    OpSet::RECEIVE_GAMMA,
    OpSet::RECEIVE_DELTA,
    OpSet::RECEIVE_EPSILON,
];

/// One program control's switch settings.
#[derive(Debug, Clone, Copy)]
struct ProgramControl {
    op: OpSet,
    clear: bool,
    repeat: u8,
}

impl Default for ProgramControl {
    fn default() -> ProgramControl {
        // The physical operation switch rests on α.
        ProgramControl {
            op: OpSet::RECEIVE_ALPHA,
            clear: false,
            repeat: 1,
        }
    }
}

struct State {
    digits: Decades,
    /// Per-decade carry flip-flops set during digit reception and
    /// cyclic counting.
    carry: u16,
    /// Carries promoted for (or produced during) the ripple pass.
    ripple: u16,
    sign: bool,
    program: [ProgramControl; PROGRAMS],
    /// Program pulses received this cycle, committed at the second RP.
    pending: [bool; PROGRAMS],
    /// Committed program latches driving the current add cycle.
    triggered: [bool; PROGRAMS],
    rep: u8,
    /// Distinguishes the first RP of a cycle from the second.
    rp_half: bool,
    figures: u8,
    selective_clear: bool,
    left: Option<Weak<Accumulator>>,
    right: Option<Weak<Accumulator>>,
    overrides: Option<Rc<Cell<OpSet>>>,
    /// Invariant violation latched by a jack handler, surfaced on the
    /// next clock pulse.
    fault: Option<Alarm>,
}

impl State {
    fn new() -> State {
        State {
            digits: Decades::ZERO,
            carry: 0,
            ripple: 0,
            sign: false,
            program: [ProgramControl::default(); PROGRAMS],
            pending: [false; PROGRAMS],
            triggered: [false; PROGRAMS],
            rep: 0,
            rp_half: false,
            figures: 10,
            selective_clear: false,
            left: None,
            right: None,
            overrides: None,
            fault: None,
        }
    }
}

/// Externally visible register state, for dumps and tooling.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub sign: bool,
    pub decade: [u8; DECADES],
    pub carry: [bool; DECADES],
    pub repeat: u8,
    pub program: [bool; PROGRAMS],
}

pub struct Accumulator {
    name: String,
    digit_in: [Jack; 5],
    add_out: Jack,
    subtract_out: Jack,
    program_in: [Jack; PROGRAMS],
    program_out: [Jack; 8],
    state: RefCell<State>,
}

impl Accumulator {
    pub fn new(number: usize) -> Rc<Accumulator> {
        let name = format!("a{number}");
        Rc::new_cyclic(|weak: &Weak<Accumulator>| {
            let digit_input = |port: usize| -> JackHandler {
                let unit = weak.clone();
                Rc::new(move |jack: &Jack, value| {
                    if let Some(unit) = unit.upgrade() {
                        unit.digit_pulse(jack, PORT_OPS[port], value);
                    }
                })
            };
            let program_input = |index: usize| -> JackHandler {
                let unit = weak.clone();
                Rc::new(move |_: &Jack, value| {
                    if value & 1 == 1 {
                        if let Some(unit) = unit.upgrade() {
                            unit.state.borrow_mut().pending[index] = true;
                        }
                    }
                })
            };
            let digit_in = std::array::from_fn(|p| {
                Jack::input(&format!("{name}.{}", PORT_NAMES[p]), digit_input(p))
            });
            let program_in = std::array::from_fn(|i| {
                Jack::input(&format!("{name}.{}i", i + 1), program_input(i))
            });
            let program_out =
                std::array::from_fn(|i| Jack::output(&format!("{name}.{}o", i + 5)));
            Accumulator {
                digit_in,
                add_out: Jack::output(&format!("{name}.A")),
                subtract_out: Jack::output(&format!("{name}.S")),
                program_in,
                program_out,
                state: RefCell::new(State::new()),
                name,
            }
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loads a signed decimal value, replacing the register contents.
    /// Negative values take the ten's complement form with the sign
    /// flip-flop set.
    pub fn set(&self, value: i64) -> Result<(), ConfigurationError> {
        if value.unsigned_abs() > 9_999_999_999 {
            return Err(ConfigurationError::InvalidValue {
                unit: self.name.clone(),
                value,
            });
        }
        let (sign, digits) = Decades::from_signed(value);
        let mut s = self.state.borrow_mut();
        s.sign = sign;
        s.digits = digits;
        s.carry = 0;
        s.ripple = 0;
        Ok(())
    }

    /// The signed value of the register under the ten's complement
    /// sign convention.
    #[must_use]
    pub fn value(&self) -> i64 {
        let s = self.state.borrow();
        s.digits.to_signed(s.sign)
    }

    /// The clear algorithm: zero decades, carries and sign.  With
    /// fewer than ten significant figures, the first dropped decade is
    /// seeded with a rounding 5.
    pub fn clear(&self) {
        let mut s = self.state.borrow_mut();
        s.digits = Decades::ZERO;
        s.carry = 0;
        s.ripple = 0;
        if s.figures < 10 {
            s.digits = s.digits.set_digit(9 - usize::from(s.figures), 5);
        }
        s.sign = false;
    }

    /// Reinitializes the unit in place: unplugs every jack, returns
    /// all switches to their rest positions, drops interconnections
    /// and clears the register.
    pub fn reset(&self) {
        for jack in &self.digit_in {
            jack.disconnect();
            jack.set_disabled(false);
        }
        self.add_out.disconnect();
        self.subtract_out.disconnect();
        for jack in &self.program_in {
            jack.disconnect();
        }
        for jack in &self.program_out {
            jack.disconnect();
        }
        *self.state.borrow_mut() = State::new();
        self.clear();
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let s = self.state.borrow();
        let mut carry = [false; DECADES];
        for (i, c) in carry.iter_mut().enumerate() {
            *c = s.carry & (1 << i) != 0;
        }
        Snapshot {
            sign: s.sign,
            decade: s.digits.digits(),
            carry,
            repeat: s.rep,
            program: s.triggered,
        }
    }

    pub fn find_jack(&self, jack: &str) -> Result<Jack, ConfigurationError> {
        match jack {
            "α" | "a" | "alpha" => return Ok(self.digit_in[0].clone()),
            "β" | "b" | "beta" => return Ok(self.digit_in[1].clone()),
            "γ" | "g" | "gamma" => return Ok(self.digit_in[2].clone()),
            "δ" | "d" | "delta" => return Ok(self.digit_in[3].clone()),
            "ε" | "e" | "epsilon" => return Ok(self.digit_in[4].clone()),
            "A" => return Ok(self.add_out.clone()),
            "S" => return Ok(self.subtract_out.clone()),
            _ => {}
        }
        if let Some(n) = jack.strip_suffix('i') {
            if let Ok(n) = n.parse::<usize>() {
                if (1..=PROGRAMS).contains(&n) {
                    return Ok(self.program_in[n - 1].clone());
                }
            }
        }
        if let Some(n) = jack.strip_suffix('o') {
            if let Ok(n) = n.parse::<usize>() {
                if (5..=PROGRAMS).contains(&n) {
                    return Ok(self.program_out[n - 5].clone());
                }
            }
        }
        Err(ConfigurationError::UnknownJack {
            name: format!("{}.{jack}", self.name),
        })
    }

    pub fn set_switch(&self, name: &str, value: &str) -> Result<(), ConfigurationError> {
        let invalid = || ConfigurationError::InvalidSwitchValue {
            switch: format!("{}.{name}", self.name),
            value: value.to_string(),
        };
        let unknown = || ConfigurationError::UnknownSwitch {
            name: format!("{}.{name}", self.name),
        };
        let mut s = self.state.borrow_mut();
        if name == "sf" {
            let figures: u8 = value.parse().map_err(|_| invalid())?;
            if figures > 10 {
                return Err(invalid());
            }
            s.figures = figures;
        } else if name == "sc" {
            s.selective_clear = match value {
                "SC" | "sc" => true,
                "0" => false,
                _ => return Err(invalid()),
            };
        } else if let Some(n) = name.strip_prefix("op") {
            let program = parse_program(n, 1).ok_or_else(unknown)?;
            s.program[program].op = op_setting(value).ok_or_else(invalid)?;
        } else if let Some(n) = name.strip_prefix("cc") {
            let program = parse_program(n, 1).ok_or_else(unknown)?;
            s.program[program].clear = match value {
                "C" | "c" => true,
                "0" => false,
                _ => return Err(invalid()),
            };
        } else if let Some(n) = name.strip_prefix("rp") {
            let program = parse_program(n, 5).ok_or_else(unknown)?;
            let repeat: u8 = value.parse().map_err(|_| invalid())?;
            if !(1..=9).contains(&repeat) {
                return Err(invalid());
            }
            s.program[program].repeat = repeat;
        } else {
            return Err(unknown());
        }
        Ok(())
    }

    pub fn get_switch(&self, name: &str) -> Result<String, ConfigurationError> {
        let unknown = || ConfigurationError::UnknownSwitch {
            name: format!("{}.{name}", self.name),
        };
        let s = self.state.borrow();
        if name == "sf" {
            return Ok(s.figures.to_string());
        }
        if name == "sc" {
            return Ok(String::from(if s.selective_clear { "SC" } else { "0" }));
        }
        if let Some(n) = name.strip_prefix("op") {
            let program = parse_program(n, 1).ok_or_else(unknown)?;
            return Ok(op_name(s.program[program].op).to_string());
        }
        if let Some(n) = name.strip_prefix("cc") {
            let program = parse_program(n, 1).ok_or_else(unknown)?;
            return Ok(String::from(if s.program[program].clear { "C" } else { "0" }));
        }
        if let Some(n) = name.strip_prefix("rp") {
            let program = parse_program(n, 5).ok_or_else(unknown)?;
            return Ok(s.program[program].repeat.to_string());
        }
        Err(unknown())
    }

    /// Interconnects `left` as this unit's left neighbour, extending
    /// the register leftwards.  Each side of a unit takes at most one
    /// cable.
    pub fn link_left(self: &Rc<Self>, left: &Rc<Accumulator>) -> Result<(), ConfigurationError> {
        if Rc::ptr_eq(self, left) {
            return Err(ConfigurationError::IllegalPairing {
                reason: format!("{} cannot be interconnected with itself", self.name),
            });
        }
        if self.left_neighbor().is_some() {
            return Err(ConfigurationError::IllegalPairing {
                reason: format!("{} already has a left interconnection", self.name),
            });
        }
        if left.right_neighbor().is_some() {
            return Err(ConfigurationError::IllegalPairing {
                reason: format!("{} already has a right interconnection", left.name),
            });
        }
        // The chain must stay linear: walking left from the new
        // neighbour must never lead back to this unit, or every chain
        // walk would loop forever.
        let mut cursor = Some(Rc::clone(left));
        while let Some(unit) = cursor {
            if Rc::ptr_eq(self, &unit) {
                return Err(ConfigurationError::IllegalPairing {
                    reason: format!(
                        "interconnecting {} with {} would close a cycle",
                        self.name, left.name
                    ),
                });
            }
            cursor = unit.left_neighbor();
        }
        self.state.borrow_mut().left = Some(Rc::downgrade(left));
        left.state.borrow_mut().right = Some(Rc::downgrade(self));
        event!(Level::DEBUG, unit = %self.name, left = %left.name, "interconnect");
        Ok(())
    }

    /// Interconnects `right` as this unit's right neighbour.
    pub fn link_right(self: &Rc<Self>, right: &Rc<Accumulator>) -> Result<(), ConfigurationError> {
        right.link_left(self)
    }

    /// Installs a shared operation mask which replaces this unit's own
    /// program resolution entirely.  Units which borrow an accumulator
    /// as a scratch operand register drive it through this path.
    pub fn install_override(&self, ops: Rc<Cell<OpSet>>) {
        self.state.borrow_mut().overrides = Some(ops);
    }

    pub fn remove_override(&self) {
        self.state.borrow_mut().overrides = None;
    }

    fn left_neighbor(&self) -> Option<Rc<Accumulator>> {
        self.state.borrow().left.as_ref()?.upgrade()
    }

    fn right_neighbor(&self) -> Option<Rc<Accumulator>> {
        self.state.borrow().right.as_ref()?.upgrade()
    }

    /// Resolves this unit's own latched programs to an operation set,
    /// or reads the override if one is installed.
    fn resolved_ops(&self) -> Result<OpSet, Alarm> {
        let s = self.state.borrow();
        if let Some(ops) = &s.overrides {
            return Ok(ops.get());
        }
        let mut ops = OpSet::EMPTY;
        let mut repeat: Option<u8> = None;
        let mut transmit_clear: Option<bool> = None;
        for (i, p) in s.program.iter().enumerate() {
            if !s.triggered[i] {
                continue;
            }
            ops |= p.op;
            if i >= SINGLE_CYCLE_PROGRAMS {
                match repeat {
                    None => repeat = Some(p.repeat),
                    Some(r) if r == p.repeat => {}
                    Some(r) => {
                        return Err(Alarm::ConflictingPrograms {
                            unit: self.name.clone(),
                            details: format!(
                                "repeat counts {r} and {} latched together",
                                p.repeat
                            ),
                        })
                    }
                }
            }
            if p.op.is_empty() || p.op.intersects(OpSet::TRANSMIT_ANY) {
                match transmit_clear {
                    None => transmit_clear = Some(p.clear),
                    Some(c) if c == p.clear => {}
                    Some(_) => {
                        return Err(Alarm::ConflictingPrograms {
                            unit: self.name.clone(),
                            details: "transmitting programs disagree on clear".to_string(),
                        })
                    }
                }
                // The clear half of the switch acts on the final
                // repeat cycle only.
                if p.clear && (i < SINGLE_CYCLE_PROGRAMS || s.rep == p.repeat - 1) {
                    ops |= OpSet::CLEAR;
                }
            } else if p.clear {
                ops |= OpSet::CORRECT;
            }
        }
        Ok(ops)
    }

    /// The operation set in force for this unit's decades: its own
    /// resolution unioned with every interconnected neighbour's, since
    /// one physical unit's program controls drive the whole extended
    /// register.
    fn effective_ops(&self) -> Result<OpSet, Alarm> {
        let mut ops = self.resolved_ops()?;
        let mut cursor = self.left_neighbor();
        while let Some(unit) = cursor {
            ops |= unit.resolved_ops()?;
            cursor = unit.left_neighbor();
        }
        let mut cursor = self.right_neighbor();
        while let Some(unit) = cursor {
            ops |= unit.resolved_ops()?;
            cursor = unit.right_neighbor();
        }
        Ok(ops)
    }

    fn digit_pulse(&self, jack: &Jack, port: OpSet, value: u16) {
        if jack.disabled() {
            // The wire graph never dispatches into a disabled jack, so
            // a delivery here means an impossible configuration.
            self.state.borrow_mut().fault = Some(Alarm::PulseOnDisabledJack { jack: jack.name() });
            return;
        }
        match self.effective_ops() {
            Ok(ops) if ops.intersects(port) => self.receive(value),
            Ok(_) => {}
            Err(alarm) => self.state.borrow_mut().fault = Some(alarm),
        }
    }

    /// Steps the decade counters for each pulsing digit line and flips
    /// the sign flip-flop on a PM pulse.  Overflow accumulates in the
    /// carry flip-flops for the ripple pass.
    fn receive(&self, value: u16) {
        let mut s = self.state.borrow_mut();
        let (digits, wrapped) = s.digits.count(value & DIGIT_LINES);
        s.digits = digits;
        s.carry |= wrapped;
        if value & PM_LINE != 0 {
            s.sign = !s.sign;
        }
    }

    /// 10P: the cyclic counting step driving transmission.
    fn digit_advance(&self) -> Result<(), Alarm> {
        let ops = self.effective_ops()?;
        if ops.intersects(OpSet::TRANSMIT_ANY) {
            let mut s = self.state.borrow_mut();
            let (digits, wrapped) = s.digits.count_all();
            s.digits = digits;
            s.carry |= wrapped;
        }
        Ok(())
    }

    /// 9P: emit this half-pulse-time's slice of the outgoing pulse
    /// trains.  The carry flip-flops double as the transmission
    /// register: a decade's flip-flop is set at the k-th 9P exactly
    /// when its digit is at least 10-k, so across the nine 9P times a
    /// decade holding d pulses its line d times.
    fn digit_transmit(&self) -> Result<(), Alarm> {
        let ops = self.effective_ops()?;
        let mut add_value = None;
        let mut subtract_value = None;
        {
            let s = self.state.borrow();
            if ops.intersects(OpSet::TRANSMIT_ADD | OpSet::TRANSMIT_BOTH)
                && self.add_out.connected()
            {
                let mut lines = s.carry & DIGIT_LINES;
                if s.sign {
                    lines |= PM_LINE;
                }
                if lines != 0 {
                    add_value = Some(lines);
                }
            }
            if ops.intersects(OpSet::TRANSMIT_BOTH | OpSet::TRANSMIT_SUBTRACT)
                && self.subtract_out.connected()
            {
                let mut lines = !s.carry & DIGIT_LINES;
                if !s.sign {
                    lines |= PM_LINE;
                }
                if lines != 0 {
                    subtract_value = Some(lines);
                }
            }
        }
        if let Some(lines) = add_value {
            self.add_out.transmit(lines);
        }
        if let Some(lines) = subtract_value {
            self.subtract_out.transmit(lines);
        }
        Ok(())
    }

    /// 1'P: the terminal corrections of ten's complement
    /// transmission.  A receiving unit under CORRECT takes the +1
    /// into the rightmost decade of its chain; a complement
    /// transmitter emits one extra pulse at the position picked out by
    /// the significant-figures switches of the interconnected pair.
    fn final_correction(&self) -> Result<(), Alarm> {
        let ops = self.effective_ops()?;
        if ops.intersects(OpSet::CORRECT) && self.right_neighbor().is_none() {
            let mut s = self.state.borrow_mut();
            let (digits, wrapped) = s.digits.count(1);
            s.digits = digits;
            s.carry |= wrapped;
        }
        if ops.intersects(OpSet::TRANSMIT_BOTH | OpSet::TRANSMIT_SUBTRACT)
            && self.subtract_out.connected()
        {
            let figures = self.state.borrow().figures;
            let left = self.left_neighbor();
            let right = self.right_neighbor();
            let emit = (left.is_none() && right.is_none() && figures > 0)
                || (right.is_some() && figures < 10)
                || (left.is_some_and(|l| l.state.borrow().figures == 10) && figures > 0)
                || (figures == 10 && right.is_some_and(|r| r.state.borrow().figures == 0));
            if emit {
                self.subtract_out.transmit(1 << (10 - figures));
            }
        }
        Ok(())
    }

    /// CCG: a program with its clear switch thrown clears the register
    /// after transmitting, unless a receive is also in progress.
    fn carry_clear_gate(&self) -> Result<(), Alarm> {
        let ops = self.effective_ops()?;
        if ops.intersects(OpSet::CLEAR) && !ops.intersects(OpSet::RECEIVE_ANY) {
            self.clear();
        }
        Ok(())
    }

    fn selective_clear_gate(&self) {
        let armed = self.state.borrow().selective_clear;
        if armed {
            self.clear();
        }
    }

    /// RP, twice per add cycle.  The first occurrence promotes the
    /// reception carries and, from the rightmost unit of a chain,
    /// runs the ripple pass.  The second clears residual ripple
    /// carries, commits program pulses received this cycle, and gates
    /// the digit input jacks to match the operations now in force.
    fn ripple_pulse(&self) -> Result<(), Alarm> {
        let first = {
            let mut s = self.state.borrow_mut();
            s.rp_half = !s.rp_half;
            s.rp_half
        };
        if first {
            {
                let mut s = self.state.borrow_mut();
                let promoted = s.carry;
                s.ripple |= promoted;
                s.carry = 0;
            }
            let ops = self.effective_ops()?;
            if self.right_neighbor().is_none() && ops.intersects(OpSet::RECEIVE_ANY) {
                self.run_ripple();
            }
        } else {
            {
                let mut s = self.state.borrow_mut();
                s.ripple = 0;
                for i in 0..PROGRAMS {
                    if s.pending[i] {
                        s.pending[i] = false;
                        s.triggered[i] = true;
                    }
                }
            }
            let ops = self.effective_ops()?;
            for (port, jack) in PORT_OPS.iter().zip(&self.digit_in) {
                jack.set_disabled(!ops.intersects(*port));
            }
        }
        Ok(())
    }

    /// One unit's share of the ripple pass: fold the carry flip-flops
    /// into the decades with a parallel decimal add.  Returns true if
    /// a carry escaped the most significant decade.
    fn ripple_step(&self) -> bool {
        let mut s = self.state.borrow_mut();
        let carries = s.carry | s.ripple;
        s.carry = 0;
        s.ripple = 0;
        if carries == 0 {
            return false;
        }
        let (digits, out) = s.digits.add(spread(carries & 0x1ff) << 4);
        s.digits = digits;
        carries & (1 << 9) != 0 || out & (1 << 9) != 0
    }

    /// The +1 a neighbour's escaping carry lands in this unit's
    /// lowest decade.
    fn carry_into_lowest(&self) {
        let mut s = self.state.borrow_mut();
        let (digits, wrapped) = s.digits.count(1);
        s.digits = digits;
        s.ripple |= wrapped;
    }

    /// Runs the ripple pass leftwards along the interconnection chain,
    /// starting from this (rightmost) unit.  A carry escaping the
    /// leftmost unit flips that unit's sign.
    fn run_ripple(&self) {
        let mut escape = self.ripple_step();
        let mut cursor = self.left_neighbor();
        if cursor.is_none() {
            if escape {
                let mut s = self.state.borrow_mut();
                s.sign = !s.sign;
            }
            return;
        }
        while let Some(unit) = cursor {
            if escape {
                unit.carry_into_lowest();
            }
            escape = unit.ripple_step();
            let next = unit.left_neighbor();
            if next.is_none() && escape {
                let mut s = unit.state.borrow_mut();
                s.sign = !s.sign;
            }
            cursor = next;
        }
    }

    /// CPP: retire finished programs.  Single-cycle programs drop
    /// their latch; repeat programs count cycles, and a program
    /// reaching its repeat setting unlatches, pulses its output
    /// terminal and resets the shared repeat counter.
    fn program_pulse(&self) {
        let mut fire: Vec<usize> = Vec::new();
        {
            let mut s = self.state.borrow_mut();
            for i in 0..SINGLE_CYCLE_PROGRAMS {
                s.triggered[i] = false;
            }
            if (SINGLE_CYCLE_PROGRAMS..PROGRAMS).any(|i| s.triggered[i]) {
                s.rep += 1;
                for i in SINGLE_CYCLE_PROGRAMS..PROGRAMS {
                    if s.triggered[i] && s.rep == s.program[i].repeat {
                        s.triggered[i] = false;
                        fire.push(i - SINGLE_CYCLE_PROGRAMS);
                    }
                }
                if !fire.is_empty() {
                    s.rep = 0;
                }
            }
        }
        for terminal in fire {
            self.program_out[terminal].transmit(1);
        }
    }
}

impl ClockedUnit for Accumulator {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn pulse(&self, signals: SignalSet) -> Result<(), Alarm> {
        if let Some(fault) = self.state.borrow_mut().fault.take() {
            return Err(fault);
        }
        if signals.contains(SignalSet::CPP) {
            self.program_pulse();
        } else if signals.contains(SignalSet::CCG) {
            self.carry_clear_gate()?;
        } else if signals.contains(SignalSet::SCG) {
            self.selective_clear_gate();
        } else if signals.contains(SignalSet::RP) {
            self.ripple_pulse()?;
        } else if signals.contains(SignalSet::TENP) {
            self.digit_advance()?;
        } else if signals.contains(SignalSet::NINEP) {
            self.digit_transmit()?;
        } else if signals.contains(SignalSet::ONEPP) {
            self.final_correction()?;
        }
        Ok(())
    }
}

impl Display for Accumulator {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let s = self.state.borrow();
        write!(f, "{} {}", if s.sign { "M" } else { "P" }, s.digits)
    }
}

fn parse_program(digits: &str, lowest: usize) -> Option<usize> {
    let n: usize = digits.parse().ok()?;
    if (lowest..=PROGRAMS).contains(&n) {
        Some(n - 1)
    } else {
        None
    }
}

fn op_setting(value: &str) -> Option<OpSet> {
    Some(match value {
        "α" | "a" | "alpha" => OpSet::RECEIVE_ALPHA,
        "β" | "b" | "beta" => OpSet::RECEIVE_BETA,
        "γ" | "g" | "gamma" => OpSet::RECEIVE_GAMMA,
        "δ" | "d" | "delta" => OpSet::RECEIVE_DELTA,
        "ε" | "e" | "epsilon" => OpSet::RECEIVE_EPSILON,
        "0" => OpSet::EMPTY,
        "A" => OpSet::TRANSMIT_ADD,
        "AS" => OpSet::TRANSMIT_BOTH,
        "S" => OpSet::TRANSMIT_SUBTRACT,
        _ => return None,
    })
}

fn op_name(op: OpSet) -> &'static str {
    match op {
        OpSet::RECEIVE_ALPHA => "α",
        OpSet::RECEIVE_BETA => "β",
        OpSet::RECEIVE_GAMMA => "γ",
        OpSet::RECEIVE_DELTA => "δ",
        OpSet::RECEIVE_EPSILON => "ε",
        OpSet::EMPTY => "0",
        OpSet::TRANSMIT_ADD => "A",
        OpSet::TRANSMIT_BOTH => "AS",
        OpSet::TRANSMIT_SUBTRACT => "S",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::PHASES;
    use crate::jack::connect;

    /// Wires a test pulse source to one of the unit's input jacks.
    fn line_to(unit: &Rc<Accumulator>, jack: &str) -> Jack {
        let line = Jack::output(&format!("test.{jack}"));
        connect(&line, &unit.find_jack(jack).unwrap()).unwrap();
        line
    }

    /// Runs both ripple pulses of a cycle, committing any program
    /// pulses received since the last commit.
    fn commit(unit: &Rc<Accumulator>) {
        unit.pulse(SignalSet::RP).unwrap();
        unit.pulse(SignalSet::RP).unwrap();
    }

    /// Counts pulses arriving at a probe input jack.
    fn probe(name: &str) -> (Jack, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        (
            Jack::input(name, Rc::new(move |_, _| c.set(c.get() + 1))),
            count,
        )
    }

    #[test]
    fn receive_and_ripple_settles_the_sum() {
        let a = Accumulator::new(1);
        a.set_switch("op1", "α").unwrap();
        let program = line_to(&a, "1i");
        let data = line_to(&a, "α");
        program.transmit(1);
        commit(&a);
        // Three pulses on digit line 0.
        data.transmit(1);
        data.transmit(1);
        data.transmit(1);
        commit(&a);
        assert_eq!(a.value(), 3);
        assert_eq!(a.to_string(), "P 0000000003");
        let snap = a.snapshot();
        assert!(!snap.sign);
        assert!(snap.carry.iter().all(|c| !c));
    }

    #[test]
    fn adding_through_zero_flips_the_sign() {
        let a = Accumulator::new(1);
        a.set(-1).unwrap();
        let program = line_to(&a, "1i");
        let data = line_to(&a, "α");
        program.transmit(1);
        commit(&a);
        data.transmit(1);
        data.transmit(1);
        commit(&a);
        assert_eq!(a.value(), 1);
        assert_eq!(a.to_string(), "P 0000000001");
    }

    #[test]
    fn pm_pulse_flips_the_sign_flip_flop() {
        let a = Accumulator::new(1);
        let program = line_to(&a, "1i");
        let data = line_to(&a, "α");
        program.transmit(1);
        commit(&a);
        data.transmit(PM_LINE);
        assert_eq!(a.to_string(), "M 0000000000");
        assert_eq!(a.value(), -10_000_000_000);
        data.transmit(PM_LINE);
        assert_eq!(a.to_string(), "P 0000000000");
    }

    #[test]
    fn set_and_value_round_trip() {
        let a = Accumulator::new(1);
        a.set(1_234_567_890).unwrap();
        assert_eq!(a.value(), 1_234_567_890);
        a.set(-42).unwrap();
        assert_eq!(a.value(), -42);
        assert_eq!(a.to_string(), "M 9999999958");
        assert!(a.set(10_000_000_000).is_err());
    }

    #[test]
    fn clear_is_idempotent_and_seeds_the_rounding_digit_once() {
        let a = Accumulator::new(1);
        a.set_switch("sf", "9").unwrap();
        a.set(123).unwrap();
        a.clear();
        assert_eq!(a.to_string(), "P 0000000005");
        a.clear();
        assert_eq!(a.to_string(), "P 0000000005");
    }

    #[test]
    fn repeat_program_fires_its_terminal_on_the_last_cycle() {
        let a = Accumulator::new(1);
        a.set_switch("op5", "0").unwrap();
        a.set_switch("rp5", "3").unwrap();
        let program = line_to(&a, "5i");
        let (sink, fired) = probe("test.chain");
        connect(&a.find_jack("5o").unwrap(), &sink).unwrap();
        program.transmit(1);
        commit(&a);
        a.pulse(SignalSet::CPP).unwrap();
        a.pulse(SignalSet::CPP).unwrap();
        assert_eq!(fired.get(), 0);
        assert_eq!(a.snapshot().repeat, 2);
        a.pulse(SignalSet::CPP).unwrap();
        assert_eq!(fired.get(), 1);
        let snap = a.snapshot();
        assert_eq!(snap.repeat, 0);
        assert!(snap.program.iter().all(|p| !p));
        // Nothing left latched; further program pulses do nothing.
        a.pulse(SignalSet::CPP).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn single_cycle_program_retires_at_the_program_pulse() {
        let a = Accumulator::new(1);
        let program = line_to(&a, "1i");
        program.transmit(1);
        commit(&a);
        assert!(a.snapshot().program[0]);
        a.pulse(SignalSet::CPP).unwrap();
        assert!(!a.snapshot().program[0]);
    }

    #[test]
    fn interconnected_pair_ripples_across_the_boundary() {
        let high = Accumulator::new(1);
        let low = Accumulator::new(2);
        low.link_left(&high).unwrap();
        low.set(-1).unwrap(); // all nines
        high.set(-1).unwrap();
        let program = line_to(&low, "1i");
        let data = line_to(&low, "α");
        program.transmit(1);
        commit(&low);
        commit(&high);
        data.transmit(1);
        low.pulse(SignalSet::RP).unwrap();
        high.pulse(SignalSet::RP).unwrap();
        low.pulse(SignalSet::RP).unwrap();
        high.pulse(SignalSet::RP).unwrap();
        // The carry walked all twenty decades and escaped the pair.
        assert_eq!(low.snapshot().decade, [0; DECADES]);
        assert_eq!(high.snapshot().decade, [0; DECADES]);
        assert!(!high.snapshot().sign);
        assert!(high.snapshot().carry.iter().all(|c| !c));
        assert!(low.snapshot().carry.iter().all(|c| !c));
    }

    #[test]
    fn pairing_rejects_self_and_occupied_sides() {
        let a = Accumulator::new(1);
        let b = Accumulator::new(2);
        let c = Accumulator::new(3);
        assert!(a.link_left(&a).is_err());
        a.link_left(&b).unwrap();
        assert!(a.link_left(&c).is_err());
        assert!(c.link_left(&b).is_err());
    }

    #[test]
    fn interconnection_cycles_are_rejected() {
        let a = Accumulator::new(1);
        let b = Accumulator::new(2);
        let c = Accumulator::new(3);
        a.link_left(&b).unwrap();
        assert!(b.link_left(&a).is_err());
        b.link_left(&c).unwrap();
        assert!(c.link_left(&a).is_err());
        // The surviving chain is still walkable end to end.
        assert!(a.effective_ops().is_ok());
        assert!(c.effective_ops().is_ok());
    }

    #[test]
    fn transmission_to_a_receiving_unit_copies_the_value() {
        let tx = Accumulator::new(1);
        let rx = Accumulator::new(2);
        tx.set(2).unwrap();
        tx.set_switch("op1", "A").unwrap();
        rx.set_switch("op1", "α").unwrap();
        connect(&tx.find_jack("A").unwrap(), &rx.find_jack("α").unwrap()).unwrap();
        let tx_program = line_to(&tx, "1i");
        let rx_program = line_to(&rx, "1i");
        tx_program.transmit(1);
        rx_program.transmit(1);
        commit(&tx);
        commit(&rx);
        for signals in PHASES {
            if !signals.is_empty() {
                tx.pulse(signals).unwrap();
                rx.pulse(signals).unwrap();
            }
        }
        assert_eq!(rx.value(), 2);
        assert_eq!(tx.value(), 2);
    }

    #[test]
    fn complement_transmission_subtracts_and_clears_the_sender() {
        let tx = Accumulator::new(1);
        let rx = Accumulator::new(2);
        tx.set(3).unwrap();
        tx.set_switch("op1", "S").unwrap();
        tx.set_switch("cc1", "C").unwrap();
        rx.set_switch("op1", "α").unwrap();
        connect(&tx.find_jack("S").unwrap(), &rx.find_jack("α").unwrap()).unwrap();
        let tx_program = line_to(&tx, "1i");
        let rx_program = line_to(&rx, "1i");
        tx_program.transmit(1);
        rx_program.transmit(1);
        commit(&tx);
        commit(&rx);
        for signals in PHASES {
            if !signals.is_empty() {
                tx.pulse(signals).unwrap();
                rx.pulse(signals).unwrap();
            }
        }
        // 0 - 3 via the ten's complement, with the sender's clear
        // switch thrown.
        assert_eq!(rx.value(), -3);
        assert_eq!(rx.to_string(), "M 9999999997");
        assert_eq!(tx.value(), 0);
    }

    #[test]
    fn receive_program_with_correct_takes_the_final_pulse() {
        let a = Accumulator::new(1);
        a.set_switch("op1", "α").unwrap();
        a.set_switch("cc1", "C").unwrap();
        let program = line_to(&a, "1i");
        program.transmit(1);
        commit(&a);
        a.pulse(SignalSet::ONEPP).unwrap();
        commit(&a);
        assert_eq!(a.value(), 1);
    }

    #[test]
    fn paired_receive_correction_enters_only_the_low_unit() {
        let hi = Accumulator::new(1);
        let lo = Accumulator::new(2);
        lo.link_left(&hi).unwrap();
        lo.set_switch("op1", "α").unwrap();
        lo.set_switch("cc1", "C").unwrap();
        let program = line_to(&lo, "1i");
        program.transmit(1);
        commit(&lo);
        commit(&hi);
        hi.pulse(SignalSet::ONEPP).unwrap();
        lo.pulse(SignalSet::ONEPP).unwrap();
        commit(&lo);
        commit(&hi);
        assert_eq!(lo.value(), 1);
        assert_eq!(hi.value(), 0);
    }

    #[test]
    fn deleted_figure_complement_rounds_at_the_correction_decade() {
        let tx = Accumulator::new(1);
        let rx = Accumulator::new(2);
        tx.set_switch("sf", "9").unwrap();
        tx.set(9).unwrap();
        tx.set_switch("op1", "S").unwrap();
        tx.set_switch("cc1", "C").unwrap();
        rx.set_switch("op1", "α").unwrap();
        connect(&tx.find_jack("S").unwrap(), &rx.find_jack("α").unwrap()).unwrap();
        let tx_program = line_to(&tx, "1i");
        let rx_program = line_to(&rx, "1i");
        tx_program.transmit(1);
        rx_program.transmit(1);
        commit(&tx);
        commit(&rx);
        for signals in PHASES {
            if !signals.is_empty() {
                tx.pulse(signals).unwrap();
                rx.pulse(signals).unwrap();
            }
        }
        // With one figure deleted the extra pulse enters decade 1, so
        // -9 rounds away entirely and the wrap restores the sign.
        assert_eq!(rx.value(), 0);
        assert_eq!(rx.to_string(), "P 0000000000");
        // The sender's clear reseeds its rounding digit.
        assert_eq!(tx.value(), 5);
    }

    #[test]
    fn paired_complement_correction_picks_one_side() {
        let hi = Accumulator::new(1);
        let lo = Accumulator::new(2);
        lo.link_left(&hi).unwrap();
        lo.set_switch("op1", "S").unwrap();
        let (hi_sink, hi_count) = probe("test.hi");
        let (lo_sink, lo_count) = probe("test.lo");
        connect(&hi.find_jack("S").unwrap(), &hi_sink).unwrap();
        connect(&lo.find_jack("S").unwrap(), &lo_sink).unwrap();
        let program = line_to(&lo, "1i");
        program.transmit(1);
        commit(&lo);
        commit(&hi);
        // With ten figures on both halves the pulse belongs to the low
        // unit.
        hi.pulse(SignalSet::ONEPP).unwrap();
        lo.pulse(SignalSet::ONEPP).unwrap();
        assert_eq!(lo_count.get(), 1);
        assert_eq!(hi_count.get(), 0);
        // Deleting every figure of the low half moves it to the high
        // unit.
        lo.set_switch("sf", "0").unwrap();
        hi.pulse(SignalSet::ONEPP).unwrap();
        lo.pulse(SignalSet::ONEPP).unwrap();
        assert_eq!(lo_count.get(), 1);
        assert_eq!(hi_count.get(), 1);
    }

    #[test]
    fn conflicting_repeat_counts_raise_an_alarm() {
        let a = Accumulator::new(1);
        a.set_switch("op5", "0").unwrap();
        a.set_switch("rp5", "2").unwrap();
        a.set_switch("op6", "0").unwrap();
        a.set_switch("rp6", "3").unwrap();
        let p5 = line_to(&a, "5i");
        let p6 = line_to(&a, "6i");
        p5.transmit(1);
        p6.transmit(1);
        a.pulse(SignalSet::RP).unwrap();
        let err = a.pulse(SignalSet::RP).unwrap_err();
        assert!(matches!(err, Alarm::ConflictingPrograms { .. }));
    }

    #[test]
    fn transmit_programs_disagreeing_on_clear_raise_an_alarm() {
        let a = Accumulator::new(1);
        a.set_switch("op1", "A").unwrap();
        a.set_switch("cc1", "C").unwrap();
        a.set_switch("op2", "A").unwrap();
        let p1 = line_to(&a, "1i");
        let p2 = line_to(&a, "2i");
        p1.transmit(1);
        p2.transmit(1);
        a.pulse(SignalSet::RP).unwrap();
        let err = a.pulse(SignalSet::RP).unwrap_err();
        assert!(matches!(err, Alarm::ConflictingPrograms { .. }));
    }

    #[test]
    fn override_replaces_program_resolution() {
        let a = Accumulator::new(1);
        let p1 = line_to(&a, "1i");
        p1.transmit(1);
        commit(&a);
        assert_eq!(a.effective_ops().unwrap(), OpSet::RECEIVE_ALPHA);
        let ops = Rc::new(Cell::new(OpSet::TRANSMIT_ADD));
        a.install_override(Rc::clone(&ops));
        assert_eq!(a.effective_ops().unwrap(), OpSet::TRANSMIT_ADD);
        ops.set(OpSet::RECEIVE_BETA);
        assert_eq!(a.effective_ops().unwrap(), OpSet::RECEIVE_BETA);
        a.remove_override();
        assert_eq!(a.effective_ops().unwrap(), OpSet::RECEIVE_ALPHA);
    }

    #[test]
    fn idle_units_gate_their_digit_inputs_off() {
        let a = Accumulator::new(1);
        let data = line_to(&a, "α");
        // No program latched: the commit disables every digit input,
        // and later pulses on the trunk are simply not delivered.
        commit(&a);
        assert!(a.find_jack("α").unwrap().disabled());
        data.transmit(1);
        assert_eq!(a.value(), 0);
    }

    #[test]
    fn delivery_into_a_disabled_jack_is_a_latched_fault() {
        let a = Accumulator::new(1);
        let alpha = a.find_jack("α").unwrap();
        alpha.set_disabled(true);
        a.digit_pulse(&alpha, OpSet::RECEIVE_ALPHA, 1);
        let err = a.pulse(SignalSet::CPP).unwrap_err();
        assert!(matches!(err, Alarm::PulseOnDisabledJack { .. }));
        // The fault is cleared once surfaced.
        a.pulse(SignalSet::CPP).unwrap();
    }

    #[test]
    fn selective_clear_only_acts_when_armed() {
        let a = Accumulator::new(1);
        a.set(77).unwrap();
        a.pulse(SignalSet::SCG).unwrap();
        assert_eq!(a.value(), 77);
        a.set_switch("sc", "SC").unwrap();
        a.pulse(SignalSet::SCG).unwrap();
        assert_eq!(a.value(), 0);
    }

    #[test]
    fn program_clear_empties_the_register_at_the_carry_clear_gate() {
        let a = Accumulator::new(1);
        a.set(77).unwrap();
        a.set_switch("op1", "A").unwrap();
        a.set_switch("cc1", "C").unwrap();
        let p1 = line_to(&a, "1i");
        p1.transmit(1);
        commit(&a);
        a.pulse(SignalSet::CCG).unwrap();
        assert_eq!(a.value(), 0);
    }

    #[test]
    fn switch_surface_round_trips_and_rejects_bad_values() {
        let a = Accumulator::new(1);
        a.set_switch("op7", "AS").unwrap();
        assert_eq!(a.get_switch("op7").unwrap(), "AS");
        a.set_switch("cc7", "C").unwrap();
        assert_eq!(a.get_switch("cc7").unwrap(), "C");
        a.set_switch("rp7", "9").unwrap();
        assert_eq!(a.get_switch("rp7").unwrap(), "9");
        a.set_switch("sf", "4").unwrap();
        assert_eq!(a.get_switch("sf").unwrap(), "4");
        assert!(a.set_switch("op7", "x").is_err());
        assert!(a.set_switch("rp3", "2").is_err());
        assert!(a.set_switch("rp7", "10").is_err());
        assert!(a.set_switch("sf", "11").is_err());
        assert!(a.set_switch("zz", "1").is_err());
    }

    #[test]
    fn find_jack_knows_every_terminal() {
        let a = Accumulator::new(3);
        assert_eq!(a.find_jack("alpha").unwrap().name(), "a3.α");
        assert_eq!(a.find_jack("A").unwrap().name(), "a3.A");
        assert_eq!(a.find_jack("12i").unwrap().name(), "a3.12i");
        assert_eq!(a.find_jack("5o").unwrap().name(), "a3.5o");
        assert!(a.find_jack("4o").is_err());
        assert!(a.find_jack("13i").is_err());
        assert!(a.find_jack("Q").is_err());
    }

    #[test]
    fn reset_reinitializes_in_place() {
        let a = Accumulator::new(1);
        let b = Accumulator::new(2);
        a.link_left(&b).unwrap();
        a.set(55).unwrap();
        a.set_switch("op3", "S").unwrap();
        a.set_switch("sf", "2").unwrap();
        let data = line_to(&a, "α");
        a.reset();
        assert_eq!(a.get_switch("op3").unwrap(), "α");
        assert_eq!(a.get_switch("sf").unwrap(), "10");
        assert_eq!(a.value(), 0);
        assert!(!data.is_connected_to(&a.find_jack("α").unwrap()));
        assert!(a.left_neighbor().is_none());
    }
}
