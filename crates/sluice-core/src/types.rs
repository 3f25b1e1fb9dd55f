//! Core protocol types: identities, phases, shared stream state and positions.
//!
//! All token amounts are in base units of their asset and use `u64`.
//! Share counts use `u128` because share issuance grows as the input pool
//! is consumed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{CUSTODY_DOMAIN, LABEL_DOMAIN};
use crate::decimal::Decimal;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// A 32-byte account identity.
///
/// Used for participants, creators, the protocol admin, the fee collector,
/// and the custody account each stream holds value in.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Self = Self([0u8; 32]);

    /// Address with every byte set to `seed`. Handy for fixtures.
    pub fn from_seed(seed: u8) -> Self {
        Self([seed; 32])
    }

    /// BLAKE3 derivation of an address from a domain separator and payload.
    pub fn derive(domain: &[u8], payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain);
        hasher.update(payload);
        Self(hasher.finalize().into())
    }

    /// Deterministic address for a human-readable label like `"alice"`.
    pub fn from_label(label: &str) -> Self {
        Self::derive(LABEL_DOMAIN, label.as_bytes())
    }

    /// The custody address holding the assets of stream `id`.
    pub fn custody(id: u64) -> Self {
        Self::derive(CUSTODY_DOMAIN, &id.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Denomination of a fungible asset.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(denom: impl Into<String>) -> Self {
        Self(denom.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle phase of a stream.
///
/// `Waiting → Bootstrapping → Active → Ended` is driven by wall-clock time.
/// `FinalizedStreamed`, `FinalizedRefunded` and `Cancelled` are terminal:
/// once reached, time never moves a stream out of them.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Before `bootstrapping_start`.
    #[default]
    Waiting,
    /// Subscriptions open, nothing streams yet.
    Bootstrapping,
    /// Between `stream_start` and `stream_end`.
    Active,
    /// Past `stream_end`, awaiting finalization.
    Ended,
    /// Finalized with the threshold reached.
    FinalizedStreamed,
    /// Finalized with the threshold missed.
    FinalizedRefunded,
    /// Cancelled by the creator or the protocol admin.
    Cancelled,
}

impl Phase {
    /// Whether time-based recomputation must leave this phase untouched.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalizedStreamed | Self::FinalizedRefunded | Self::Cancelled
        )
    }

    /// Whether participants may subscribe or withdraw.
    pub fn accepts_deposits(&self) -> bool {
        matches!(self, Self::Bootstrapping | Self::Active)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Bootstrapping => "bootstrapping",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::FinalizedStreamed => "finalized_streamed",
            Self::FinalizedRefunded => "finalized_refunded",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Immutable time boundaries of a stream.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Window {
    pub bootstrapping_start: Timestamp,
    pub stream_start: Timestamp,
    pub stream_end: Timestamp,
}

impl Window {
    /// `bootstrapping_start ≤ stream_start < stream_end`.
    pub fn is_well_formed(&self) -> bool {
        self.bootstrapping_start <= self.stream_start && self.stream_start < self.stream_end
    }

    pub fn duration(&self) -> u64 {
        self.stream_end.saturating_sub(self.stream_start)
    }
}

/// Linear vesting applied to a payout, relative to the payout time.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct VestingSchedule {
    /// Seconds after the payout before anything vests.
    pub cliff_duration: u64,
    /// Seconds after the payout until everything has vested.
    pub duration: u64,
}

/// Protocol-wide settings, snapshotted into each stream at creation.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ProtocolParams {
    pub fee_collector: Address,
    /// Share of the creator's proceeds withheld as protocol fee, in `[0, 1]`.
    pub exit_fee_ratio: Decimal,
    pub protocol_admin: Address,
    /// Input assets streams may be denominated in.
    pub accepted_assets: Vec<AssetId>,
}

/// Creator-chosen parameters of a single stream.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct StreamParams {
    pub creator: Address,
    /// Asset participants deposit.
    pub in_asset: AssetId,
    /// Asset being distributed.
    pub out_asset: AssetId,
    /// Total output allocation.
    pub out_supply: u64,
    pub window: Window,
    /// Minimum consumed input for the stream to settle.
    pub threshold: u64,
    /// Applied to participants' purchased output on settlement.
    pub subscriber_vesting: Option<VestingSchedule>,
    /// Applied to the creator's revenue on finalization.
    pub creator_vesting: Option<VestingSchedule>,
}

/// Shared distribution state of one stream.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct SharedState {
    /// Cumulative output released per unit of share.
    pub dist_index: Decimal,
    /// Output not yet released into the accumulator.
    pub out_remaining: u64,
    /// Deposited input not yet consumed.
    pub in_supply: u64,
    /// Cumulative input consumed.
    pub spent_in: u64,
    /// Total outstanding shares.
    pub shares: u128,
    /// Last observed `consumed_in / distributed_out`.
    pub current_streamed_price: Decimal,
    pub threshold: u64,
    pub out_supply: u64,
    pub last_updated: Timestamp,
}

impl SharedState {
    /// Fresh state for a stream distributing `out_supply`.
    pub fn new(out_supply: u64, threshold: u64, now: Timestamp) -> Self {
        Self {
            dist_index: Decimal::ZERO,
            out_remaining: out_supply,
            in_supply: 0,
            spent_in: 0,
            shares: 0,
            current_streamed_price: Decimal::ZERO,
            threshold,
            out_supply,
            last_updated: now,
        }
    }

    pub fn threshold_reached(&self) -> bool {
        self.spent_in >= self.threshold
    }

    /// Output released into the accumulator so far.
    pub fn distributed_out(&self) -> u64 {
        self.out_supply - self.out_remaining
    }
}

/// One participant's record.
///
/// The live balance is never stored directly: `in_balance` and `purchased`
/// are brought up to date against the shared accumulator on every sync.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Position {
    /// Unspent deposit.
    pub in_balance: u64,
    pub shares: u128,
    /// `dist_index` observed at the last sync.
    pub index: Decimal,
    pub last_update_time: Timestamp,
    /// Fractional output carried between syncs.
    pub pending_reward: Decimal,
    /// Cumulative consumed deposit.
    pub spent_in: u64,
    /// Cumulative output earned.
    pub purchased: u64,
    /// Zero while active; the exit time once exited.
    pub exit_date: Timestamp,
}

impl Position {
    pub fn is_exited(&self) -> bool {
        self.exit_date != 0
    }

    /// Holds shares and has not exited.
    pub fn is_active(&self) -> bool {
        self.shares > 0 && !self.is_exited()
    }
}

/// The single persisted record of a stream instance.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct StreamRecord {
    pub id: u64,
    /// Account holding the stream's input deposits and output allocation.
    pub custody: Address,
    pub params: StreamParams,
    /// Protocol settings as of creation.
    pub protocol: ProtocolParams,
    pub state: SharedState,
    pub phase: Phase,
}
