//! CLI command implementations

mod build;
mod config;

pub use build::{BuildArgs, cmd_build};
pub use config::cmd_config_init;
