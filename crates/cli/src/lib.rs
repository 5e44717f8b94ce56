//! Shared pieces of the `lockwatch` binary

pub mod logging;
pub mod settings;
