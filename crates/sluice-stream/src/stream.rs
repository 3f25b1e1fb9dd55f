//! The stream orchestrator.
//!
//! [`Stream`] owns a single stream record and its ledger. Every public
//! operation runs the same pipeline on copies of the persisted state:
//!
//! 1. derive the phase from `now`
//! 2. advance the shared distribution state
//! 3. sync the caller's position (participant-scoped operations)
//! 4. validate and apply the operation's own effect
//! 5. check that every account paying out holds enough
//! 6. commit record and positions through the [`StreamLedger`]
//! 7. create vesting wallets and move value through the [`AssetTransfer`]
//!    collaborator
//!
//! Any error before step 6 discards the copies. An error in step 7 reverses
//! the transfers already made and restores the ledger, so a failed operation
//! leaves the record, the positions and all balances as they were.

use std::collections::BTreeMap;

use tracing::{debug, error, info};

use sluice_core::decimal::{Decimal, Rounding};
use sluice_core::error::{MathError, StoreError, StreamError, TransferError};
use sluice_core::traits::{AssetTransfer, StreamLedger, VestingIssuer};
use sluice_core::types::{
    Address, AssetId, Phase, Position, ProtocolParams, SharedState, StreamParams, StreamRecord,
    Timestamp, VestingSchedule,
};
use sluice_math::{advance, compute_exit_fee, compute_share_amount, derive_phase, sync_position};

use crate::receipt::{
    CancelReceipt, ExitOutcome, ExitReceipt, FinalizeReceipt, SubscribeReceipt, WithdrawReceipt,
};

/// Execution context of a single operation: the current time and the
/// value-moving collaborators.
pub struct Env<'a> {
    pub now: Timestamp,
    pub bank: &'a mut dyn AssetTransfer,
    pub vesting: &'a mut dyn VestingIssuer,
}

impl<'a> Env<'a> {
    pub fn new(
        now: Timestamp,
        bank: &'a mut dyn AssetTransfer,
        vesting: &'a mut dyn VestingIssuer,
    ) -> Self {
        Self { now, bank, vesting }
    }
}

/// One stream instance bound to its ledger.
pub struct Stream<L: StreamLedger> {
    ledger: L,
    record: StreamRecord,
}

impl<L: StreamLedger> Stream<L> {
    /// Create stream `id` and pull its output allocation into custody.
    ///
    /// The protocol parameters are copied into the record and never read
    /// from anywhere else afterwards.
    pub fn create(
        id: u64,
        params: StreamParams,
        protocol: ProtocolParams,
        mut ledger: L,
        env: &mut Env<'_>,
    ) -> Result<Self, StreamError> {
        if ledger.load_record()?.is_some() {
            return Err(StoreError::RecordExists.into());
        }
        if !params.window.is_well_formed() || env.now > params.window.bootstrapping_start {
            return Err(StreamError::InvalidWindow);
        }
        if params.in_asset == params.out_asset {
            return Err(StreamError::SameAssets);
        }
        if !protocol.accepted_assets.contains(&params.in_asset) {
            return Err(StreamError::AssetNotAccepted(params.in_asset.to_string()));
        }
        if params.out_supply == 0 {
            return Err(StreamError::InvalidAmount);
        }
        if protocol.exit_fee_ratio > Decimal::ONE {
            return Err(StreamError::InvalidFeeRatio);
        }
        let schedules = [params.subscriber_vesting, params.creator_vesting];
        if schedules.iter().flatten().any(|s| s.cliff_duration > s.duration) {
            return Err(StreamError::InvalidVestingSchedule);
        }

        let have = env.bank.balance(&params.out_asset, &params.creator);
        if have < params.out_supply {
            return Err(StreamError::InsufficientOutAmount { have, need: params.out_supply });
        }

        let custody = Address::custody(id);
        let record = StreamRecord {
            id,
            custody,
            state: SharedState::new(params.out_supply, params.threshold, env.now),
            phase: Phase::Waiting,
            params,
            protocol,
        };

        let moves = [Move::pull(
            &record.params.out_asset,
            &record.params.creator,
            &custody,
            record.params.out_supply,
        )];
        ledger.save_record(&record)?;
        if let Err(err) = transfer_all(env.bank, &moves) {
            if let Err(restore) = ledger.restore(None, &[]) {
                error!(stream = id, error = %restore, "failed to remove record of aborted stream");
                return Err(restore.into());
            }
            return Err(err.into());
        }

        info!(
            stream = id,
            creator = %record.params.creator,
            out_supply = record.params.out_supply,
            threshold = record.params.threshold,
            "stream created"
        );
        Ok(Self { ledger, record })
    }

    /// Resume a stream from its persisted record.
    pub fn load(ledger: L) -> Result<Self, StreamError> {
        let record = ledger.load_record()?.ok_or(StoreError::MissingRecord)?;
        Ok(Self { ledger, record })
    }

    // --- participant operations ---

    /// Deposit `amount` of the input asset.
    pub fn subscribe(
        &mut self,
        env: &mut Env<'_>,
        sender: &Address,
        amount: u64,
    ) -> Result<SubscribeReceipt, StreamError> {
        let mut record = self.advanced(env.now)?;
        if amount == 0 {
            return Err(StreamError::InvalidAmount);
        }
        if !record.phase.accepts_deposits() {
            return Err(StreamError::not_allowed("subscribe", record.phase));
        }
        let (mut position, _) = self.synced(&record, sender, env.now)?;

        let state = &mut record.state;
        let shares = compute_share_amount(amount, Rounding::Down, state.in_supply, state.shares)?;
        if shares == 0 {
            return Err(StreamError::InvalidAmount);
        }
        position.in_balance = add(position.in_balance, amount)?;
        position.shares = add_shares(position.shares, shares)?;
        state.in_supply = add(state.in_supply, amount)?;
        state.shares = add_shares(state.shares, shares)?;

        let moves = [Move::pull(&record.params.in_asset, sender, &record.custody, amount)];
        ensure_funds(&*env.bank, &moves)?;
        self.commit_then(record, &[(*sender, position.clone())], || {
            Ok(transfer_all(env.bank, &moves)?)
        })?;

        info!(stream = self.record.id, %sender, amount, shares, "subscribed");
        Ok(SubscribeReceipt { amount, shares, position })
    }

    /// Take back `cap` of the caller's unspent deposit.
    pub fn withdraw(
        &mut self,
        env: &mut Env<'_>,
        sender: &Address,
        cap: u64,
    ) -> Result<WithdrawReceipt, StreamError> {
        let mut record = self.advanced(env.now)?;
        if cap == 0 {
            return Err(StreamError::InvalidAmount);
        }
        let (mut position, _) = self.synced(&record, sender, env.now)?;
        if !position.is_active() {
            return Err(StreamError::InvalidPosition);
        }
        if !record.phase.accepts_deposits() {
            return Err(StreamError::not_allowed("withdraw", record.phase));
        }
        if cap > position.in_balance {
            return Err(StreamError::WithdrawAmountExceedsBalance {
                requested: cap,
                available: position.in_balance,
            });
        }

        let state = &mut record.state;
        let burned = if cap == position.in_balance {
            position.shares
        } else {
            compute_share_amount(cap, Rounding::Up, state.in_supply, state.shares)?
                .min(position.shares)
        };
        position.in_balance -= cap;
        position.shares -= burned;
        if position.shares == 0 {
            // Without shares the remainder can no longer be withdrawn.
            position.spent_in = add(position.spent_in, position.in_balance)?;
            position.in_balance = 0;
        }
        state.in_supply = sub(state.in_supply, cap)?;
        state.shares = state.shares.checked_sub(burned).ok_or(MathError::ArithmeticOverflow)?;
        if state.shares == 0 {
            // Flooring dust nobody can withdraw is booked as consumed.
            state.spent_in = add(state.spent_in, state.in_supply)?;
            state.in_supply = 0;
        }

        let moves = [Move::push(&record.params.in_asset, &record.custody, sender, cap)];
        ensure_funds(&*env.bank, &moves)?;
        self.commit_then(record, &[(*sender, position.clone())], || {
            Ok(transfer_all(env.bank, &moves)?)
        })?;

        info!(stream = self.record.id, %sender, amount = cap, shares_burned = burned, "withdrew");
        Ok(WithdrawReceipt { amount: cap, shares_burned: burned, position })
    }

    /// Close the caller's position once the stream has an outcome.
    ///
    /// Settles (unspent input plus purchased output) after a successful
    /// stream, refunds the whole deposit after a failed or cancelled one.
    pub fn exit_stream(
        &mut self,
        env: &mut Env<'_>,
        sender: &Address,
    ) -> Result<ExitReceipt, StreamError> {
        let mut record = self.advanced(env.now)?;
        let (mut position, stored) = self.synced(&record, sender, env.now)?;
        if !stored || !position.is_active() {
            return Err(StreamError::InvalidPosition);
        }

        let reached = record.state.threshold_reached();
        let outcome = match record.phase {
            Phase::FinalizedStreamed => ExitOutcome::Settled,
            Phase::Ended if reached => ExitOutcome::Settled,
            Phase::Ended | Phase::FinalizedRefunded | Phase::Cancelled => ExitOutcome::Refunded,
            phase => return Err(StreamError::InvalidExitCondition(phase)),
        };
        let (refunded_in, purchased_out) = match outcome {
            ExitOutcome::Settled => (position.in_balance, position.purchased),
            ExitOutcome::Refunded => (add(position.in_balance, position.spent_in)?, 0),
        };

        record.state.in_supply = sub(record.state.in_supply, position.in_balance)?;
        record.state.shares = record
            .state
            .shares
            .checked_sub(position.shares)
            .ok_or(MathError::ArithmeticOverflow)?;
        position.exit_date = env.now.max(1);

        let params = record.params.clone();
        let custody = record.custody;
        let mut moves = [
            Move::push(&params.in_asset, &custody, sender, refunded_in),
            Move::push(&params.out_asset, &custody, sender, purchased_out),
        ];
        ensure_funds(&*env.bank, &moves)?;
        let vesting_wallet = self.commit_then(record, &[(*sender, position)], || {
            let (out_to, wallet) = route_payout(
                env,
                params.subscriber_vesting,
                sender,
                &params.out_asset,
                purchased_out,
            )?;
            moves[1].to = out_to;
            transfer_all(env.bank, &moves)?;
            Ok(wallet)
        })?;

        info!(
            stream = self.record.id,
            %sender,
            ?outcome,
            refunded_in,
            purchased_out,
            "exited"
        );
        Ok(ExitReceipt { outcome, refunded_in, purchased_out, vesting_wallet })
    }

    // --- creator and admin operations ---

    /// Settle the creator's side after `stream_end`.
    pub fn finalize_stream(
        &mut self,
        env: &mut Env<'_>,
        sender: &Address,
    ) -> Result<FinalizeReceipt, StreamError> {
        let mut record = self.advanced(env.now)?;
        if *sender != record.params.creator {
            return Err(StreamError::Unauthorized);
        }
        if record.phase != Phase::Ended {
            return Err(StreamError::not_allowed("finalize", record.phase));
        }

        let state = &record.state;
        let (phase, fee, creator_revenue, refunded_out) = if state.threshold_reached() {
            let (fee, revenue) = compute_exit_fee(state.spent_in, record.protocol.exit_fee_ratio)?;
            (Phase::FinalizedStreamed, fee, revenue, state.out_remaining)
        } else {
            (Phase::FinalizedRefunded, 0, 0, state.out_supply)
        };

        let params = record.params.clone();
        let custody = record.custody;
        let mut moves = [
            Move::push(&params.in_asset, &custody, &record.protocol.fee_collector, fee),
            Move::push(&params.in_asset, &custody, &params.creator, creator_revenue),
            Move::push(&params.out_asset, &custody, &params.creator, refunded_out),
        ];
        ensure_funds(&*env.bank, &moves)?;

        record.phase = phase;
        let vesting_wallet = self.commit_then(record, &[], || {
            let (revenue_to, wallet) = route_payout(
                env,
                params.creator_vesting,
                &params.creator,
                &params.in_asset,
                creator_revenue,
            )?;
            moves[1].to = revenue_to;
            transfer_all(env.bank, &moves)?;
            Ok(wallet)
        })?;

        info!(
            stream = self.record.id,
            %phase,
            fee,
            creator_revenue,
            refunded_out,
            "stream finalized"
        );
        Ok(FinalizeReceipt { phase, fee, creator_revenue, refunded_out, vesting_wallet })
    }

    /// Creator cancellation, allowed only before bootstrapping starts.
    pub fn cancel_stream(
        &mut self,
        env: &mut Env<'_>,
        sender: &Address,
    ) -> Result<CancelReceipt, StreamError> {
        let record = self.advanced(env.now)?;
        if *sender != record.params.creator {
            return Err(StreamError::Unauthorized);
        }
        if record.phase != Phase::Waiting {
            return Err(StreamError::not_allowed("cancel", record.phase));
        }
        self.cancel(env, record)
    }

    /// Protocol admin cancellation, allowed until the stream ends.
    pub fn cancel_with_admin(
        &mut self,
        env: &mut Env<'_>,
        sender: &Address,
    ) -> Result<CancelReceipt, StreamError> {
        let record = self.advanced(env.now)?;
        if *sender != record.protocol.protocol_admin {
            return Err(StreamError::Unauthorized);
        }
        if !matches!(record.phase, Phase::Waiting | Phase::Bootstrapping | Phase::Active) {
            return Err(StreamError::not_allowed("cancel_with_admin", record.phase));
        }
        self.cancel(env, record)
    }

    /// Deposits stay in custody; participants reclaim them by exiting.
    fn cancel(
        &mut self,
        env: &mut Env<'_>,
        mut record: StreamRecord,
    ) -> Result<CancelReceipt, StreamError> {
        let refunded_out = record.params.out_supply;
        let moves = [Move::push(
            &record.params.out_asset,
            &record.custody,
            &record.params.creator,
            refunded_out,
        )];
        ensure_funds(&*env.bank, &moves)?;

        record.phase = Phase::Cancelled;
        self.commit_then(record, &[], || Ok(transfer_all(env.bank, &moves)?))?;

        info!(stream = self.record.id, refunded_out, "stream cancelled");
        Ok(CancelReceipt { refunded_out })
    }

    // --- permissionless syncs ---

    /// Bring the shared state up to `now` and persist it.
    pub fn sync_stream_external(&mut self, env: &mut Env<'_>) -> Result<SharedState, StreamError> {
        let record = self.advanced(env.now)?;
        self.commit(record, &[])?;
        Ok(self.record.state.clone())
    }

    /// Bring `owner`'s position up to `now` and persist it.
    ///
    /// An owner without a stored position gets the zero position back and
    /// nothing is written for them.
    pub fn sync_position_external(
        &mut self,
        env: &mut Env<'_>,
        owner: &Address,
    ) -> Result<Position, StreamError> {
        let record = self.advanced(env.now)?;
        let (position, stored) = self.synced(&record, owner, env.now)?;
        if !stored {
            self.commit(record, &[])?;
            return Ok(Position::default());
        }
        self.commit(record, &[(*owner, position.clone())])?;
        Ok(position)
    }

    // --- queries ---

    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn custody(&self) -> &Address {
        &self.record.custody
    }

    pub fn params(&self) -> &StreamParams {
        &self.record.params
    }

    pub fn protocol(&self) -> &ProtocolParams {
        &self.record.protocol
    }

    pub fn record(&self) -> &StreamRecord {
        &self.record
    }

    /// Phase as of the last committed operation.
    pub fn phase(&self) -> Phase {
        self.record.phase
    }

    /// Phase the next operation at `now` would observe.
    pub fn phase_at(&self, now: Timestamp) -> Phase {
        derive_phase(self.record.phase, now, &self.record.params.window)
    }

    pub fn shared_state(&self) -> &SharedState {
        &self.record.state
    }

    /// Stored position of `owner`, as of its last sync.
    pub fn position(&self, owner: &Address) -> Result<Option<Position>, StreamError> {
        Ok(self.ledger.get_position(owner)?)
    }

    pub fn positions(&self) -> Result<Vec<(Address, Position)>, StreamError> {
        Ok(self.ledger.positions()?)
    }

    pub fn threshold_reached(&self) -> bool {
        self.record.state.threshold_reached()
    }

    /// Consumed input per unit of distributed output, `None` before any
    /// output has been distributed.
    pub fn average_price(&self) -> Result<Option<Decimal>, MathError> {
        let distributed = self.record.state.distributed_out();
        if distributed == 0 {
            return Ok(None);
        }
        Decimal::from_ratio(self.record.state.spent_in as u128, distributed as u128).map(Some)
    }

    pub fn last_streamed_price(&self) -> Decimal {
        self.record.state.current_streamed_price
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn into_ledger(self) -> L {
        self.ledger
    }

    // --- internals ---

    /// Copy of the record with phase and shared state brought up to `now`.
    /// A cancelled stream is frozen.
    fn advanced(&self, now: Timestamp) -> Result<StreamRecord, StreamError> {
        let mut record = self.record.clone();
        record.phase = derive_phase(record.phase, now, &record.params.window);
        if record.phase == Phase::Cancelled {
            return Ok(record);
        }

        record.state = advance(&record.state, &record.params.window, now)?;
        if record.state.dist_index != self.record.state.dist_index {
            debug!(
                stream = record.id,
                now,
                dist_index = %record.state.dist_index,
                out_remaining = record.state.out_remaining,
                in_supply = record.state.in_supply,
                "distribution advanced"
            );
        }
        Ok(record)
    }

    /// `owner`'s position synced against `record`, and whether it was stored.
    /// Unknown owners get a fresh position at the current index.
    fn synced(
        &self,
        record: &StreamRecord,
        owner: &Address,
        now: Timestamp,
    ) -> Result<(Position, bool), StreamError> {
        let stored = self.ledger.get_position(owner)?;
        let exists = stored.is_some();
        let position = stored.unwrap_or_default();
        if position.is_exited() {
            return Err(StreamError::InvalidPosition);
        }

        let state = &record.state;
        let synced = sync_position(&position, state.dist_index, state.shares, state.in_supply, now)?;
        if exists && synced.purchased != position.purchased {
            debug!(
                stream = record.id,
                %owner,
                purchased = synced.purchased,
                in_balance = synced.in_balance,
                "position synced"
            );
        }
        Ok((synced, exists))
    }

    fn commit(
        &mut self,
        record: StreamRecord,
        positions: &[(Address, Position)],
    ) -> Result<(), StreamError> {
        self.ledger.commit(&record, positions)?;
        self.record = record;
        Ok(())
    }

    /// Commit, then run `settle`. When `settle` fails the record and the
    /// touched positions are written back as they were.
    fn commit_then<T>(
        &mut self,
        record: StreamRecord,
        positions: &[(Address, Position)],
        settle: impl FnOnce() -> Result<T, StreamError>,
    ) -> Result<T, StreamError> {
        let previous = positions
            .iter()
            .map(|(owner, _)| Ok((*owner, self.ledger.get_position(owner)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        self.ledger.commit(&record, positions)?;

        match settle() {
            Ok(value) => {
                self.record = record;
                Ok(value)
            }
            Err(err) => {
                if let Err(restore) = self.ledger.restore(Some(&self.record), &previous) {
                    error!(stream = record.id, error = %restore, cause = %err, "failed to restore ledger");
                    return Err(restore.into());
                }
                debug!(stream = record.id, error = %err, "settlement failed, ledger restored");
                Err(err)
            }
        }
    }
}

/// One value movement into or out of custody.
#[derive(Debug, Clone)]
struct Move {
    asset: AssetId,
    from: Address,
    to: Address,
    amount: u64,
    /// Pulled into custody rather than pushed out of it.
    inbound: bool,
}

impl Move {
    fn pull(asset: &AssetId, from: &Address, custody: &Address, amount: u64) -> Self {
        Self { asset: asset.clone(), from: *from, to: *custody, amount, inbound: true }
    }

    fn push(asset: &AssetId, custody: &Address, to: &Address, amount: u64) -> Self {
        Self { asset: asset.clone(), from: *custody, to: *to, amount, inbound: false }
    }

    fn apply(&self, bank: &mut dyn AssetTransfer) -> Result<(), TransferError> {
        if self.inbound {
            bank.pull(&self.asset, &self.from, &self.to, self.amount)
        } else {
            bank.push(&self.asset, &self.from, &self.to, self.amount)
        }
    }

    fn reversed(&self) -> Self {
        Self { from: self.to, to: self.from, inbound: !self.inbound, ..self.clone() }
    }
}

/// Fail unless every payer holds what it sends, summed per asset.
fn ensure_funds(bank: &dyn AssetTransfer, moves: &[Move]) -> Result<(), TransferError> {
    let mut needed: BTreeMap<(&AssetId, &Address), u128> = BTreeMap::new();
    for m in moves {
        *needed.entry((&m.asset, &m.from)).or_default() += m.amount as u128;
    }
    for ((asset, payer), need) in needed {
        let have = bank.balance(asset, payer);
        if (have as u128) < need {
            return Err(TransferError::InsufficientBalance {
                asset: asset.to_string(),
                have,
                need: u64::try_from(need).unwrap_or(u64::MAX),
            });
        }
    }
    Ok(())
}

/// Apply `moves` in order, skipping zero amounts. If one fails, those
/// already applied are reversed.
fn transfer_all(bank: &mut dyn AssetTransfer, moves: &[Move]) -> Result<(), TransferError> {
    let moves: Vec<&Move> = moves.iter().filter(|m| m.amount > 0).collect();
    for (done, m) in moves.iter().enumerate() {
        if let Err(err) = m.apply(bank) {
            for applied in moves[..done].iter().rev() {
                if let Err(undo) = applied.reversed().apply(bank) {
                    error!(
                        asset = %applied.asset,
                        from = %applied.from,
                        to = %applied.to,
                        amount = applied.amount,
                        error = %undo,
                        "failed to reverse transfer"
                    );
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Recipient of a payout: a fresh vesting wallet when a schedule applies,
/// the beneficiary otherwise.
fn route_payout(
    env: &mut Env<'_>,
    schedule: Option<VestingSchedule>,
    beneficiary: &Address,
    asset: &AssetId,
    amount: u64,
) -> Result<(Address, Option<Address>), StreamError> {
    match schedule {
        Some(schedule) if amount > 0 => {
            let cliff_time = add(env.now, schedule.cliff_duration)?;
            let end_time = add(env.now, schedule.duration)?;
            let wallet = env
                .vesting
                .create_vesting_schedule(beneficiary, asset, cliff_time, end_time, amount)?;
            debug!(%beneficiary, %wallet, amount, cliff_time, end_time, "vesting wallet created");
            Ok((wallet, Some(wallet)))
        }
        _ => Ok((*beneficiary, None)),
    }
}

fn add(a: u64, b: u64) -> Result<u64, MathError> {
    a.checked_add(b).ok_or(MathError::ArithmeticOverflow)
}

fn sub(a: u64, b: u64) -> Result<u64, MathError> {
    a.checked_sub(b).ok_or(MathError::ArithmeticOverflow)
}

fn add_shares(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_add(b).ok_or(MathError::ArithmeticOverflow)
}
