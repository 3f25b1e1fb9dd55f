//! Trait interfaces between the stream orchestrator and its collaborators.
//!
//! - [`StreamLedger`] — the stream record plus keyed positions (sluice-stream
//!   ships an in-memory ledger, sluice-store a RocksDB one)
//! - [`AssetTransfer`] — custody pulls and pushes of fungible assets
//! - [`VestingIssuer`] — creation of linear vesting wallets for payouts

use crate::error::{StoreError, TransferError, VestingError};
use crate::types::{Address, AssetId, Position, StreamRecord, Timestamp};

/// Persistent state of one stream instance.
///
/// Holds a single [`StreamRecord`] and an open-ended collection of
/// [`Position`]s keyed by owner. The orchestrator is the only writer.
pub trait StreamLedger: Send + Sync {
    /// The stream record, or `None` before creation.
    fn load_record(&self) -> Result<Option<StreamRecord>, StoreError>;

    /// Overwrite the stream record.
    fn save_record(&mut self, record: &StreamRecord) -> Result<(), StoreError>;

    /// Look up a position. Returns `None` for owners that never subscribed.
    fn get_position(&self, owner: &Address) -> Result<Option<Position>, StoreError>;

    /// Overwrite a position.
    fn set_position(&mut self, owner: &Address, position: &Position) -> Result<(), StoreError>;

    /// All stored positions.
    fn positions(&self) -> Result<Vec<(Address, Position)>, StoreError>;

    /// Persist the outcome of one operation.
    ///
    /// Default implementation writes positions first, then the record.
    /// Backends with transactional writes should override this to commit
    /// everything at once.
    fn commit(
        &mut self,
        record: &StreamRecord,
        positions: &[(Address, Position)],
    ) -> Result<(), StoreError> {
        for (owner, position) in positions {
            self.set_position(owner, position)?;
        }
        self.save_record(record)
    }

    /// Write back state captured before a commit.
    ///
    /// `record` of `None` deletes the record; a position of `None` deletes
    /// that owner's position.
    fn restore(
        &mut self,
        record: Option<&StreamRecord>,
        positions: &[(Address, Option<Position>)],
    ) -> Result<(), StoreError>;
}

/// Movement of fungible assets between accounts.
///
/// Each call either moves the full amount or fails without moving anything.
pub trait AssetTransfer: Send + Sync {
    /// Current balance of `owner` in `asset`.
    fn balance(&self, asset: &AssetId, owner: &Address) -> u64;

    /// Pull `amount` of `asset` from `from` into the custody account `to`.
    fn pull(
        &mut self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), TransferError>;

    /// Push `amount` of `asset` held by `custody` out to `to`.
    fn push(
        &mut self,
        asset: &AssetId,
        custody: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), TransferError>;
}

/// Issuer of linear vesting wallets.
///
/// The returned wallet is the recipient the orchestrator pushes the vested
/// amount to.
pub trait VestingIssuer: Send + Sync {
    fn create_vesting_schedule(
        &mut self,
        beneficiary: &Address,
        asset: &AssetId,
        cliff_time: Timestamp,
        end_time: Timestamp,
        amount: u64,
    ) -> Result<Address, VestingError>;
}
