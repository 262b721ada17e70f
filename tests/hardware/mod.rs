//! Tests against real RIOT builds.
//!
//! These tests are ignored by default and require a RIOT checkout. They
//! should be run manually with the `--ignored` flag and appropriate
//! environment variables set.

pub mod iotlab_tests;
pub mod native_tests;
pub mod utils;
