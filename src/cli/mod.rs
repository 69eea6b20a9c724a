//! CLI module for voxbridge - command-line interface and subcommands.
//!
//! Provides demo entry points for the transport, the host bus and the
//! connection lifecycle.

pub mod commands;

pub use commands::Cli;
