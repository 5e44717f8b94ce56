//! Platform-specific observers

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::InotifywaitSource;
