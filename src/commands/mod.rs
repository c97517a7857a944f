//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the `unity`
//! command-line tool. Each subcommand is defined in its own file.
//!
//! ## Structure
//!
//! Each command module contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` and performs the
//!   command's logic by calling into the `unity` library.

pub mod sandbox;
pub mod test;
