// Demonstration binary: wires a directory-based `ClassFinder`, the
// fixture `ClassFileReader`, and a `parking_lot`-backed `System`, then runs
// a `Class#method` entry point to completion. Not part of the tested core
// (see `classvm::vm` / `classvm::interpreter` for that); this only proves
// the collaborators assemble into a runnable `Machine`.

use std::process::ExitCode;

use clap::Parser;

use classvm::classpath::{ClassPath, FixtureClassFileReader};
use classvm::config::Cli;
use classvm::heap::NoBarrier;
use classvm::system::StdSystem;
use classvm::vm::Machine;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let (class_name, method_name) = match cli.entry_point.split_once('#') {
        Some(parts) => parts,
        None => {
            eprintln!("entry point must be `Class#method`, got `{}`", cli.entry_point);
            return ExitCode::FAILURE;
        }
    };

    let machine = match Machine::new(
        Box::new(StdSystem),
        Box::new(NoBarrier),
        Box::new(ClassPath::from_str(&cli.classpath)),
        Box::new(FixtureClassFileReader::new()),
        cli.vm_config(),
    ) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("failed to start machine: {e}");
            return ExitCode::FAILURE;
        }
    };

    let class = match machine.resolver.resolve_class(class_name) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("could not load `{class_name}`: {e:?}");
            return ExitCode::FAILURE;
        }
    };
    let method = match class.methods.iter().find(|m| m.name == method_name) {
        Some(m) => m.clone(),
        None => {
            eprintln!("`{class_name}` has no method named `{method_name}`");
            return ExitCode::FAILURE;
        }
    };

    let thread = machine.spawn_thread(None);
    match machine.run(thread, method) {
        Some(result) => {
            println!("{class_name}#{method_name} returned {result:?}");
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("{class_name}#{method_name} exited with an uncaught exception");
            ExitCode::FAILURE
        }
    }
}
