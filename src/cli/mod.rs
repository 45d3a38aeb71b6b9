//! Command-line interface for loopguard.

mod commands;
mod icons;

pub use commands::{is_verbose, run};
