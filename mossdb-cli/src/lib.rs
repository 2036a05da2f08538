//! Operator tool for mossdb database directories.

mod cli;

pub use cli::Cli;
