use std::fs;

use clap::{Arg, ArgAction, Command};
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use sim::{Cycle, Machine, RunMode};

mod script;

fn run_simulator() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("Pulse-level simulator")
        .about("Run a wiring-diagram setup script on the simulated machine")
        .arg(
            Arg::new("SCRIPT")
                .help("Setup script of patch and switch commands")
                .required(true),
        )
        .arg(
            Arg::new("cycles")
                .long("cycles")
                .value_name("N")
                .help("Number of add cycles to run")
                .default_value("1"),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .action(ArgAction::SetTrue)
                .help("Print accumulator state after the run"),
        )
        .get_matches();

    // See
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Box::new(e));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let path = matches
        .get_one::<String>("SCRIPT")
        .ok_or("SCRIPT is required")?;
    let cycles: u64 = matches
        .get_one::<String>("cycles")
        .map(String::as_str)
        .unwrap_or("1")
        .parse()?;

    let text = fs::read_to_string(path)?;
    let machine = Machine::new();
    script::apply(&machine, &text)?;

    let (mut cycle, _handle) = Cycle::new(machine.clear_predicate());
    machine.register_units(&mut cycle);
    cycle.set_test_cycles(cycles);
    cycle.set_mode(RunMode::Test);
    if let Err(alarm) = cycle.run() {
        event!(Level::ERROR, "Simulation halted: {}", alarm);
        return Err(Box::new(alarm));
    }
    event!(
        Level::INFO,
        cycles = cycle.add_cycle_count(),
        "run complete"
    );

    if matches.get_flag("dump") {
        print!("{}", machine.dump());
    }
    Ok(())
}

fn main() {
    match run_simulator() {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
