//! Common utilities for integration tests

#![allow(dead_code, unused_imports)]

pub mod scenarios;
pub mod test_helpers;

// Re-export commonly used items
pub use scenarios::{binding_definition, binding_model, tight_newton, volume_source_model};
pub use test_helpers::{assert_monotone_times, relative_error, simpson};
