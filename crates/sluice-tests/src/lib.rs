//! Cross-crate test suite for Sluice.
//!
//! Integration tests drive whole stream lifecycles through the public
//! orchestrator API and check value conservation, rounding and phase
//! invariants under arbitrary operation sequences.

pub mod helpers;
