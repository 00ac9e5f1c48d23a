//! CLI command implementations

mod config;
mod demo;

pub use config::{config_get, config_init, config_set, config_show, load_effective};
pub use demo::{run_demo, DemoOptions, DemoReport, Direction, StreamOutcome};
