//! End-to-end tests for the release-test harness.
//!
//! These tests drive the orchestrator the way a release test does: acquire
//! nodes, talk to their shells and release everything, including after
//! failures, panics and interrupts.

pub mod lifecycle_tests;
pub mod ordering_tests;
