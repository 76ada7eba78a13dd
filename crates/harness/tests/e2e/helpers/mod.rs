//! Shared E2E test helpers.
//!
//! Provides a stateful fake provisioning tool, fixture directories, harness
//! construction, and report assertions.

pub mod fake_tool;
pub mod fixtures;
