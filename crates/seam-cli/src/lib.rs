//! Seam CLI - command line driver for the seam injection engine
//!
//! Instruments source trees, lists injection sites and runs methods of
//! instrumented classes. The binary in `main.rs` only parses arguments and
//! prints what these commands return.

pub mod commands;

pub use commands::{execute, parse_value, CliCommand, CommandOutput};
