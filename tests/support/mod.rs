//! Test support module
//!
//! Shared fixtures, store doubles, and helper functions for the
//! integration test binaries.

pub mod helpers;

// Re-export rstest fixtures for convenient use in tests
pub mod fixtures;
