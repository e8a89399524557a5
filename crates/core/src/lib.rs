pub mod config;
pub mod error;

pub use config::{KilnConfig, ProcessOverrides, SchedulerSettings, process_config_key};
pub use error::*;
