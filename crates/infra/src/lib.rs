//! Infrastructure layer: outbox storage, dispatching, background workers.

pub mod config;
pub mod outbox;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, DispatcherConfig};
