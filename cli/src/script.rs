//! Setup-script parsing.
//!
//! A setup script is the textual form of a wiring diagram: one
//! command per line, `#` starting a comment.
//!
//! ```text
//! p a1.A a2.α       # patch two jacks (or a jack and a tray)
//! s a1.op5 A        # set a switch
//! set a1 -42        # load a signed value
//! il a2 a3          # interconnect a3 to the left of a2
//! ir a3 a2          # interconnect a2 to the right of a3
//! g a1.5i           # send an initiating pulse into a jack
//! clear             # raise the selective-clear request
//! ```

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use sim::{ConfigurationError, Machine};

#[derive(Debug)]
pub enum ScriptError {
    Malformed { line: usize, text: String },
    Configuration { line: usize, error: ConfigurationError },
}

impl Display for ScriptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ScriptError::Malformed { line, text } => {
                write!(f, "line {line}: unrecognized command: {text}")
            }
            ScriptError::Configuration { line, error } => {
                write!(f, "line {line}: {error}")
            }
        }
    }
}

impl Error for ScriptError {}

/// Applies a setup script to a machine, stopping at the first error.
pub fn apply(machine: &Machine, script: &str) -> Result<(), ScriptError> {
    for (number, raw) in script.lines().enumerate() {
        let line = number + 1;
        let text = raw.split_once('#').map_or(raw, |(head, _)| head).trim();
        if text.is_empty() {
            continue;
        }
        let configuration = |error| ScriptError::Configuration { line, error };
        let malformed = || ScriptError::Malformed {
            line,
            text: text.to_string(),
        };
        let fields: Vec<&str> = text.split_whitespace().collect();
        match fields.as_slice() {
            ["p", j1, j2] => machine.patch(j1, j2).map_err(configuration)?,
            ["s", name, value] => machine.set_switch(name, value).map_err(configuration)?,
            ["set", unit, value] => {
                let value: i64 = value.parse().map_err(|_| malformed())?;
                machine.set_value(unit, value).map_err(configuration)?;
            }
            ["il", unit, neighbor] => machine.link_left(unit, neighbor).map_err(configuration)?,
            ["ir", unit, neighbor] => machine.link_right(unit, neighbor).map_err(configuration)?,
            ["g", jack] => machine.pulse(jack).map_err(configuration)?,
            ["clear"] => machine.clear_gate().set(true),
            _ => return Err(malformed()),
        }
    }
    Ok(())
}
