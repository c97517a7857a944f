//! # Unity CLI
//!
//! Entry point of the `unity` binary. Exit status: 0 when every run passed,
//! 1 when tests failed (the report already said so, nothing more is
//! printed) and 2 for any other error, which is printed once.

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;

fn tests_failed(err: &anyhow::Error) -> bool {
    err.downcast_ref::<unity::error::Error>()
        .is_some_and(|e| e.is_tests_failed())
}

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if tests_failed(&err) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
