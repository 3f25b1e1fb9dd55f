//! Shared fixtures for integration tests.

use sluice_core::decimal::Decimal;
use sluice_core::error::StreamError;
use sluice_core::traits::{AssetTransfer, StreamLedger};
use sluice_core::types::{
    Address, AssetId, Position, ProtocolParams, StreamParams, StreamRecord, Timestamp, Window,
};
use sluice_stream::{
    CancelReceipt, Env, ExitReceipt, FinalizeReceipt, MemoryBank, MemoryLedger, MemoryVesting,
    Stream, SubscribeReceipt, WithdrawReceipt,
};

pub const BOOTSTRAP: Timestamp = 1_000;
pub const START: Timestamp = 2_000;
pub const END: Timestamp = 12_000;

pub const OUT_SUPPLY: u64 = 1_000_000;
/// Input balance minted to every participant.
pub const FUNDING: u64 = 1_000_000_000;
/// Number of funded participants.
pub const PARTICIPANTS: u8 = 16;

pub fn creator() -> Address {
    Address::from_label("creator")
}

pub fn admin() -> Address {
    Address::from_label("admin")
}

pub fn collector() -> Address {
    Address::from_label("fee-collector")
}

/// The `i`-th funded participant.
pub fn participant(i: u8) -> Address {
    Address::from_seed(0x10 + i)
}

pub fn in_asset() -> AssetId {
    AssetId::new("uusdc")
}

pub fn out_asset() -> AssetId {
    AssetId::new("usluice")
}

pub fn window() -> Window {
    Window { bootstrapping_start: BOOTSTRAP, stream_start: START, stream_end: END }
}

/// Protocol settings with a 1% exit fee.
pub fn protocol() -> ProtocolParams {
    ProtocolParams {
        fee_collector: collector(),
        exit_fee_ratio: Decimal::from_ratio(1, 100).unwrap(),
        protocol_admin: admin(),
        accepted_assets: vec![in_asset()],
    }
}

pub fn stream_params(threshold: u64) -> StreamParams {
    StreamParams {
        creator: creator(),
        in_asset: in_asset(),
        out_asset: out_asset(),
        out_supply: OUT_SUPPLY,
        window: window(),
        threshold,
        subscriber_vesting: None,
        creator_vesting: None,
    }
}

/// Bank holding the creator's allocation and every participant's funding.
pub fn funded_bank() -> MemoryBank {
    let mut bank = MemoryBank::new();
    bank.mint(&out_asset(), &creator(), OUT_SUPPLY);
    for i in 0..PARTICIPANTS {
        bank.mint(&in_asset(), &participant(i), FUNDING);
    }
    bank
}

/// A stream together with the collaborators it moves value through.
pub struct Harness<L: StreamLedger> {
    pub bank: MemoryBank,
    pub vesting: MemoryVesting,
    pub stream: Stream<L>,
}

impl Harness<MemoryLedger> {
    /// In-memory stream created at time 0.
    pub fn new(threshold: u64) -> Self {
        Self::create(stream_params(threshold), MemoryLedger::new())
    }
}

impl<L: StreamLedger> Harness<L> {
    /// Create stream 1 at time 0 on `ledger`.
    pub fn create(params: StreamParams, ledger: L) -> Self {
        let mut bank = funded_bank();
        let mut vesting = MemoryVesting::new();
        let mut env = Env::new(0, &mut bank, &mut vesting);
        let stream = Stream::create(1, params, protocol(), ledger, &mut env).unwrap();
        Self { bank, vesting, stream }
    }

    pub fn subscribe(
        &mut self,
        now: Timestamp,
        who: Address,
        amount: u64,
    ) -> Result<SubscribeReceipt, StreamError> {
        let mut env = Env::new(now, &mut self.bank, &mut self.vesting);
        self.stream.subscribe(&mut env, &who, amount)
    }

    pub fn withdraw(
        &mut self,
        now: Timestamp,
        who: Address,
        cap: u64,
    ) -> Result<WithdrawReceipt, StreamError> {
        let mut env = Env::new(now, &mut self.bank, &mut self.vesting);
        self.stream.withdraw(&mut env, &who, cap)
    }

    pub fn exit(&mut self, now: Timestamp, who: Address) -> Result<ExitReceipt, StreamError> {
        let mut env = Env::new(now, &mut self.bank, &mut self.vesting);
        self.stream.exit_stream(&mut env, &who)
    }

    pub fn finalize(&mut self, now: Timestamp) -> Result<FinalizeReceipt, StreamError> {
        let mut env = Env::new(now, &mut self.bank, &mut self.vesting);
        self.stream.finalize_stream(&mut env, &creator())
    }

    pub fn cancel_with_admin(&mut self, now: Timestamp) -> Result<CancelReceipt, StreamError> {
        let mut env = Env::new(now, &mut self.bank, &mut self.vesting);
        self.stream.cancel_with_admin(&mut env, &admin())
    }

    pub fn poke(&mut self, now: Timestamp) -> Result<(), StreamError> {
        let mut env = Env::new(now, &mut self.bank, &mut self.vesting);
        self.stream.sync_stream_external(&mut env).map(|_| ())
    }

    pub fn touch(&mut self, now: Timestamp, who: Address) -> Result<Position, StreamError> {
        let mut env = Env::new(now, &mut self.bank, &mut self.vesting);
        self.stream.sync_position_external(&mut env, &who)
    }

    pub fn balance(&self, asset: &AssetId, who: Address) -> u64 {
        self.bank.balance(asset, &who)
    }

    pub fn custody_balance(&self, asset: &AssetId) -> u64 {
        self.bank.balance(asset, self.stream.custody())
    }

    /// Everything an operation could have changed.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            record: self.stream.record().clone(),
            positions: self.stream.positions().unwrap(),
            custody_in: self.custody_balance(&in_asset()),
            custody_out: self.custody_balance(&out_asset()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub record: StreamRecord,
    pub positions: Vec<(Address, Position)>,
    pub custody_in: u64,
    pub custody_out: u64,
}
