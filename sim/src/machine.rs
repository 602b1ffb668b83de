//! Machine assembly: the full complement of units and the plugboard
//! name space.
//!
//! A `Machine` owns the twenty accumulators and resolves the dotted
//! names used by setup scripts ("a7.α", "a12.op5") to the unit
//! surfaces behind them.  Bare names denote trays, the pass-through
//! trunk jacks used to fan a single output to several inputs; trays
//! are created the first time they are named.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::accumulator::Accumulator;
use crate::alarm::ConfigurationError;
use crate::cycle::{ClockedUnit, Cycle};
use crate::jack::{connect, Jack};

/// How many accumulators the machine carries.
pub const ACCUMULATORS: usize = 20;

pub struct Machine {
    accumulators: Vec<Rc<Accumulator>>,
    trays: RefCell<HashMap<String, Jack>>,
    clear_request: Rc<Cell<bool>>,
}

impl Machine {
    #[must_use]
    pub fn new() -> Machine {
        Machine {
            accumulators: (1..=ACCUMULATORS).map(Accumulator::new).collect(),
            trays: RefCell::new(HashMap::new()),
            clear_request: Rc::new(Cell::new(false)),
        }
    }

    /// Looks up an accumulator by name ("a1" through "a20").
    pub fn accumulator(&self, name: &str) -> Result<&Rc<Accumulator>, ConfigurationError> {
        self.accumulators
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| ConfigurationError::UnknownUnit {
                name: name.to_string(),
            })
    }

    /// Resolves a plugboard name.  "unit.jack" names a unit terminal;
    /// a bare name is a tray, created on first use.
    pub fn find_jack(&self, name: &str) -> Result<Jack, ConfigurationError> {
        if let Some((unit, jack)) = name.split_once('.') {
            self.accumulator(unit)?.find_jack(jack)
        } else {
            Ok(self
                .trays
                .borrow_mut()
                .entry(name.to_string())
                .or_insert_with(|| Jack::forwarding(name))
                .clone())
        }
    }

    /// Plugs a patch cable between two named jacks.
    pub fn patch(&self, j1: &str, j2: &str) -> Result<(), ConfigurationError> {
        connect(&self.find_jack(j1)?, &self.find_jack(j2)?)
    }

    pub fn set_switch(&self, name: &str, value: &str) -> Result<(), ConfigurationError> {
        let (unit, switch) = name
            .split_once('.')
            .ok_or_else(|| ConfigurationError::UnknownSwitch {
                name: name.to_string(),
            })?;
        self.accumulator(unit)?.set_switch(switch, value)
    }

    pub fn get_switch(&self, name: &str) -> Result<String, ConfigurationError> {
        let (unit, switch) = name
            .split_once('.')
            .ok_or_else(|| ConfigurationError::UnknownSwitch {
                name: name.to_string(),
            })?;
        self.accumulator(unit)?.get_switch(switch)
    }

    /// Loads a signed value directly into a unit's register.
    pub fn set_value(&self, unit: &str, value: i64) -> Result<(), ConfigurationError> {
        self.accumulator(unit)?.set(value)
    }

    /// Interconnects `neighbor` to the left of `unit`.
    pub fn link_left(&self, unit: &str, neighbor: &str) -> Result<(), ConfigurationError> {
        let unit = Rc::clone(self.accumulator(unit)?);
        let neighbor = Rc::clone(self.accumulator(neighbor)?);
        unit.link_left(&neighbor)
    }

    /// Interconnects `neighbor` to the right of `unit`.
    pub fn link_right(&self, unit: &str, neighbor: &str) -> Result<(), ConfigurationError> {
        let unit = Rc::clone(self.accumulator(unit)?);
        let neighbor = Rc::clone(self.accumulator(neighbor)?);
        unit.link_right(&neighbor)
    }

    /// Sends a single initiating pulse into a named jack, the way the
    /// initiating unit starts a program chain.
    pub fn pulse(&self, jack: &str) -> Result<(), ConfigurationError> {
        let target = self.find_jack(jack)?;
        let source = Jack::output("init");
        connect(&source, &target)?;
        source.transmit(1);
        source.disconnect();
        Ok(())
    }

    /// The shared selective-clear request flag.  Whoever owns a
    /// handle may raise it; the sequencer's clear gate reads it at
    /// the selective-clear slot of each add cycle.
    #[must_use]
    pub fn clear_gate(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.clear_request)
    }

    /// The clear-gate predicate to construct the sequencer with.
    #[must_use]
    pub fn clear_predicate(&self) -> Box<dyn Fn() -> bool> {
        let request = Rc::clone(&self.clear_request);
        Box::new(move || request.get())
    }

    /// Registers every unit with the sequencer, in the fixed machine
    /// order.
    pub fn register_units(&self, cycle: &mut Cycle) {
        for unit in &self.accumulators {
            cycle.register(Rc::clone(unit) as Rc<dyn ClockedUnit>);
        }
    }

    /// One line of state per accumulator.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for unit in &self.accumulators {
            out.push_str(&format!("{}: {unit}\n", unit.name()));
        }
        out
    }

    pub fn reset(&self) {
        for unit in &self.accumulators {
            unit.reset();
        }
        self.trays.borrow_mut().clear();
        self.clear_request.set(false);
    }
}

impl Default for Machine {
    fn default() -> Machine {
        Machine::new()
    }
}
