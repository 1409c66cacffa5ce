//! CLI tool for inspecting consistent hash rings.
//!
//! Provides commands for:
//! - Locating routing keys
//! - Showing key distribution across members
//! - Measuring churn when members join or leave
//! - Rendering the balancer service config

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
