//! Results of value-moving stream operations.

use serde::{Deserialize, Serialize};

use sluice_core::types::{Address, Phase, Position};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SubscribeReceipt {
    /// Input pulled into custody.
    pub amount: u64,
    /// Shares credited for the deposit.
    pub shares: u128,
    /// Caller's position after the deposit.
    pub position: Position,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WithdrawReceipt {
    /// Input returned to the caller.
    pub amount: u64,
    pub shares_burned: u128,
    pub position: Position,
}

/// Which branch an exit took.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Unspent input refunded, purchased output delivered.
    Settled,
    /// All deposited input refunded, no output delivered.
    Refunded,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ExitReceipt {
    pub outcome: ExitOutcome,
    pub refunded_in: u64,
    pub purchased_out: u64,
    /// Set when the purchased output went into a vesting wallet.
    pub vesting_wallet: Option<Address>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FinalizeReceipt {
    /// `FinalizedStreamed` or `FinalizedRefunded`.
    pub phase: Phase,
    /// Protocol fee routed to the fee collector.
    pub fee: u64,
    /// Input proceeds routed to the creator.
    pub creator_revenue: u64,
    /// Output returned to the creator.
    pub refunded_out: u64,
    /// Set when the creator revenue went into a vesting wallet.
    pub vesting_wallet: Option<Address>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CancelReceipt {
    /// Output returned to the creator.
    pub refunded_out: u64,
}
