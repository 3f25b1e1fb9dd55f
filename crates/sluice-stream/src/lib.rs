//! # sluice-stream — Stream orchestrator.
//!
//! Owns one stream instance and drives it through its lifecycle:
//! - [`stream::Stream`] — the phase state machine and every public operation
//! - [`memory`] — in-memory ledger, bank and vesting issuer
//! - [`receipt`] — per-operation results reported to callers
//!
//! Every operation derives the phase, advances the shared distribution
//! state, syncs the caller's position, validates, and only then moves value
//! and persists. A failed operation leaves no trace.

pub mod memory;
pub mod receipt;
pub mod stream;

pub use memory::{MemoryBank, MemoryLedger, MemoryVesting, VestingGrant};
pub use receipt::{
    CancelReceipt, ExitOutcome, ExitReceipt, FinalizeReceipt, SubscribeReceipt, WithdrawReceipt,
};
pub use stream::{Env, Stream};
