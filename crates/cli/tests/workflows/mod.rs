//! Workflow integration tests
//!
//! Tests for complete workflows that exercise the binary end to end and
//! validate what lands on disk.

pub mod commands;
pub mod run_session;
