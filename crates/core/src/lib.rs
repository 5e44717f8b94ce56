//! Core types for lockwatch
//!
//! This crate provides:
//! - Session configuration (TOML file + environment layering)
//! - The converter seam (lock file -> derived file)
//! - BLAKE3 content fingerprints for idempotent conversion
//! - Change events and the shared error taxonomy

pub mod config;
pub mod convert;
pub mod error;
pub mod event;
pub mod fingerprint;

// Re-exports
pub use config::{Backend, ConverterConfig, UnavailablePolicy, WatchConfig, WatchSettings};
pub use convert::{CommandConverter, Converter};
pub use error::{ConversionError, Error};
pub use event::ChangeEvent;
pub use fingerprint::Fingerprint;

/// Result type for lockwatch operations
pub type Result<T> = std::result::Result<T, Error>;
