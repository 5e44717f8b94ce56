//! Integration tests for lockwatch
//!
//! End-to-end runs of the real binary against temporary projects with an
//! instrumented converter.

// Test modules
mod common;
mod workflows;
