//! In-memory collaborators.
//!
//! [`MemoryLedger`], [`MemoryBank`] and [`MemoryVesting`] keep everything in
//! `HashMap`s/`Vec`s with no persistence. They back the test suites and the
//! simulator; production deployments substitute their own implementations of
//! the sluice-core traits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sluice_core::constants::VESTING_DOMAIN;
use sluice_core::error::{StoreError, TransferError, VestingError};
use sluice_core::traits::{AssetTransfer, StreamLedger, VestingIssuer};
use sluice_core::types::{Address, AssetId, Position, StreamRecord, Timestamp};

/// Ledger of one stream held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    record: Option<StreamRecord>,
    positions: HashMap<Address, Position>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl StreamLedger for MemoryLedger {
    fn load_record(&self) -> Result<Option<StreamRecord>, StoreError> {
        Ok(self.record.clone())
    }

    fn save_record(&mut self, record: &StreamRecord) -> Result<(), StoreError> {
        self.record = Some(record.clone());
        Ok(())
    }

    fn get_position(&self, owner: &Address) -> Result<Option<Position>, StoreError> {
        Ok(self.positions.get(owner).cloned())
    }

    fn set_position(&mut self, owner: &Address, position: &Position) -> Result<(), StoreError> {
        self.positions.insert(*owner, position.clone());
        Ok(())
    }

    /// Positions ordered by owner address.
    fn positions(&self) -> Result<Vec<(Address, Position)>, StoreError> {
        let mut all: Vec<_> = self
            .positions
            .iter()
            .map(|(owner, position)| (*owner, position.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }

    fn restore(
        &mut self,
        record: Option<&StreamRecord>,
        positions: &[(Address, Option<Position>)],
    ) -> Result<(), StoreError> {
        for (owner, position) in positions {
            match position {
                Some(position) => {
                    self.positions.insert(*owner, position.clone());
                }
                None => {
                    self.positions.remove(owner);
                }
            }
        }
        self.record = record.cloned();
        Ok(())
    }
}

/// Balances of every account in every asset.
#[derive(Debug, Clone, Default)]
pub struct MemoryBank {
    balances: HashMap<(AssetId, Address), u64>,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` of `asset` to `owner` out of thin air.
    pub fn mint(&mut self, asset: &AssetId, owner: &Address, amount: u64) {
        let balance = self.balances.entry((asset.clone(), *owner)).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Sum of all balances in `asset`.
    pub fn total_supply(&self, asset: &AssetId) -> u128 {
        self.balances
            .iter()
            .filter(|((a, _), _)| a == asset)
            .map(|(_, amount)| *amount as u128)
            .sum()
    }

    /// Move `amount` from `from` to `to`, or nothing at all.
    fn transfer(
        &mut self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), TransferError> {
        let have = self.balance(asset, from);
        if have < amount {
            return Err(TransferError::InsufficientBalance {
                asset: asset.to_string(),
                have,
                need: amount,
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        let credited = self
            .balance(asset, to)
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected(format!("{asset} balance overflow for {to}")))?;

        self.balances.insert((asset.clone(), *from), have - amount);
        self.balances.insert((asset.clone(), *to), credited);
        Ok(())
    }
}

impl AssetTransfer for MemoryBank {
    fn balance(&self, asset: &AssetId, owner: &Address) -> u64 {
        self.balances
            .get(&(asset.clone(), *owner))
            .copied()
            .unwrap_or(0)
    }

    fn pull(
        &mut self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), TransferError> {
        self.transfer(asset, from, to, amount)
    }

    fn push(
        &mut self,
        asset: &AssetId,
        custody: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), TransferError> {
        self.transfer(asset, custody, to, amount)
    }
}

/// A vesting wallet recorded by [`MemoryVesting`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VestingGrant {
    pub wallet: Address,
    pub beneficiary: Address,
    pub asset: AssetId,
    pub cliff_time: Timestamp,
    pub end_time: Timestamp,
    pub amount: u64,
}

/// Vesting issuer that only records the grants it creates.
#[derive(Debug, Clone, Default)]
pub struct MemoryVesting {
    grants: Vec<VestingGrant>,
}

impl MemoryVesting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grants(&self) -> &[VestingGrant] {
        &self.grants
    }

    pub fn grant(&self, wallet: &Address) -> Option<&VestingGrant> {
        self.grants.iter().find(|g| &g.wallet == wallet)
    }
}

impl VestingIssuer for MemoryVesting {
    fn create_vesting_schedule(
        &mut self,
        beneficiary: &Address,
        asset: &AssetId,
        cliff_time: Timestamp,
        end_time: Timestamp,
        amount: u64,
    ) -> Result<Address, VestingError> {
        if end_time < cliff_time {
            return Err(VestingError::Rejected(format!(
                "end {end_time} before cliff {cliff_time}"
            )));
        }

        let mut payload = beneficiary.as_bytes().to_vec();
        payload.extend_from_slice(&(self.grants.len() as u64).to_be_bytes());
        let wallet = Address::derive(VESTING_DOMAIN, &payload);

        self.grants.push(VestingGrant {
            wallet,
            beneficiary: *beneficiary,
            asset: asset.clone(),
            cliff_time,
            end_time,
            amount,
        });
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> AssetId {
        AssetId::new("uusdc")
    }

    #[test]
    fn pull_moves_funds() {
        let mut bank = MemoryBank::new();
        let (alice, custody) = (Address::from_seed(1), Address::from_seed(2));
        bank.mint(&usdc(), &alice, 100);
        bank.pull(&usdc(), &alice, &custody, 40).unwrap();
        assert_eq!(bank.balance(&usdc(), &alice), 60);
        assert_eq!(bank.balance(&usdc(), &custody), 40);
        assert_eq!(bank.total_supply(&usdc()), 100);
    }

    #[test]
    fn failed_pull_moves_nothing() {
        let mut bank = MemoryBank::new();
        let (alice, custody) = (Address::from_seed(1), Address::from_seed(2));
        bank.mint(&usdc(), &alice, 10);
        let err = bank.pull(&usdc(), &alice, &custody, 11).unwrap_err();
        assert_eq!(
            err,
            TransferError::InsufficientBalance { asset: "uusdc".into(), have: 10, need: 11 }
        );
        assert_eq!(bank.balance(&usdc(), &alice), 10);
        assert_eq!(bank.balance(&usdc(), &custody), 0);
    }

    #[test]
    fn push_out_of_custody() {
        let mut bank = MemoryBank::new();
        let (custody, bob) = (Address::from_seed(2), Address::from_seed(3));
        bank.mint(&usdc(), &custody, 5);
        bank.push(&usdc(), &custody, &bob, 5).unwrap();
        assert_eq!(bank.balance(&usdc(), &custody), 0);
        assert_eq!(bank.balance(&usdc(), &bob), 5);
    }

    #[test]
    fn self_transfer_keeps_balance() {
        let mut bank = MemoryBank::new();
        let alice = Address::from_seed(1);
        bank.mint(&usdc(), &alice, 5);
        bank.pull(&usdc(), &alice, &alice, 5).unwrap();
        assert_eq!(bank.balance(&usdc(), &alice), 5);
    }

    #[test]
    fn ledger_positions_sorted_by_owner() {
        let mut ledger = MemoryLedger::new();
        ledger.set_position(&Address::from_seed(9), &Position::default()).unwrap();
        ledger.set_position(&Address::from_seed(1), &Position::default()).unwrap();
        let owners: Vec<_> = ledger.positions().unwrap().into_iter().map(|(a, _)| a).collect();
        assert_eq!(owners, vec![Address::from_seed(1), Address::from_seed(9)]);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn vesting_wallets_are_unique_per_grant() {
        let mut vesting = MemoryVesting::new();
        let alice = Address::from_seed(1);
        let w1 = vesting.create_vesting_schedule(&alice, &usdc(), 10, 20, 5).unwrap();
        let w2 = vesting.create_vesting_schedule(&alice, &usdc(), 10, 20, 5).unwrap();
        assert_ne!(w1, w2);
        assert_eq!(vesting.grant(&w2).unwrap().amount, 5);
        assert_eq!(vesting.grants().len(), 2);
    }

    #[test]
    fn vesting_rejects_end_before_cliff() {
        let mut vesting = MemoryVesting::new();
        let err = vesting
            .create_vesting_schedule(&Address::from_seed(1), &usdc(), 20, 10, 5)
            .unwrap_err();
        assert!(matches!(err, VestingError::Rejected(_)));
        assert!(vesting.grants().is_empty());
    }
}
