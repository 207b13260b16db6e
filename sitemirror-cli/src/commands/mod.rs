//! Subcommand implementations.

pub mod download;
pub mod serve;
pub mod status;
