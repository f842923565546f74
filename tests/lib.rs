//! Shared infrastructure for RIFT integration tests
//!
//! - [`fixtures`]: ready-made pairs of punch coordinators
//! - [`test_helpers`]: simulated NATs, skewed clocks and CI-aware timeouts

pub mod fixtures;
pub mod test_helpers;
