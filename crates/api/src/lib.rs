//! HTTP API: dispatch trigger, producer endpoint and operator views.

pub mod app;
pub mod settings;
