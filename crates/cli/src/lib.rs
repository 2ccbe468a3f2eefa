//! Railgun flow operator CLI
//!
//! Reads [`OperatorConfig`] from the environment and runs one subcommand
//! against a sidecar engine and an RPC endpoint.

pub mod commands;
pub mod config;

pub use commands::{bridge_engine, execute, Cli, Command, Session};
pub use config::OperatorConfig;
