//! Scenario replay.
//!
//! Mints the scenario's starting balances into an in-memory bank, creates
//! the stream on the given ledger and applies every action in time order.
//! Rejected operations are recorded in the report and do not stop the run.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use sluice_core::decimal::Decimal;
use sluice_core::error::StreamError;
use sluice_core::traits::{AssetTransfer, StreamLedger};
use sluice_core::types::{Address, AssetId, Phase, Position, SharedState, Timestamp};
use sluice_stream::{
    CancelReceipt, Env, ExitReceipt, FinalizeReceipt, MemoryBank, MemoryVesting, Stream,
    SubscribeReceipt, VestingGrant, WithdrawReceipt,
};

use crate::scenario::{resolve, ActionConfig, OpKind, ScenarioConfig};

#[derive(Debug, Serialize)]
pub struct Report {
    pub stream_id: u64,
    pub phase: Phase,
    pub steps: Vec<Step>,
    pub state: SharedState,
    pub average_price: Option<Decimal>,
    pub positions: Vec<PositionReport>,
    pub balances: Vec<BalanceReport>,
    pub vesting: Vec<VestingGrant>,
}

impl Report {
    /// Number of steps that were rejected.
    pub fn rejected(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, Outcome::Rejected { .. }))
            .count()
    }
}

#[derive(Debug, Serialize)]
pub struct Step {
    pub at: Timestamp,
    pub sender: String,
    pub op: OpKind,
    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Subscribed(SubscribeReceipt),
    Withdrew(WithdrawReceipt),
    Exited(ExitReceipt),
    Finalized(FinalizeReceipt),
    Cancelled(CancelReceipt),
    StreamSynced(SharedState),
    PositionSynced(Position),
    Rejected { error: String },
}

#[derive(Debug, Serialize)]
pub struct PositionReport {
    pub owner: String,
    pub position: Position,
}

#[derive(Debug, Serialize)]
pub struct BalanceReport {
    pub owner: String,
    pub asset: AssetId,
    pub amount: u64,
}

/// Run `scenario` against `ledger`, which must not hold a stream yet.
pub fn replay<L: StreamLedger>(scenario: &ScenarioConfig, ledger: L) -> Result<Report> {
    let mut bank = MemoryBank::new();
    let mut vesting = MemoryVesting::new();
    for balance in &scenario.balances {
        bank.mint(&AssetId::new(&balance.asset), &resolve(&balance.owner), balance.amount);
    }

    let params = scenario.stream_params();
    let protocol = scenario.protocol_params()?;
    let mut env = Env::new(scenario.stream.created_at, &mut bank, &mut vesting);
    let mut stream = Stream::create(scenario.stream_id, params, protocol, ledger, &mut env)
        .with_context(|| format!("failed to create stream {}", scenario.stream_id))?;

    let mut actions: Vec<&ActionConfig> = scenario.actions.iter().collect();
    actions.sort_by_key(|a| a.at);

    let mut steps = Vec::with_capacity(actions.len());
    for action in actions {
        let mut env = Env::new(action.at, &mut bank, &mut vesting);
        let outcome = match apply(&mut stream, &mut env, action) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(at = action.at, sender = %action.sender, op = ?action.op, error = %e, "operation rejected");
                Outcome::Rejected { error: e.to_string() }
            }
        };
        steps.push(Step {
            at: action.at,
            sender: action.sender.clone(),
            op: action.op,
            outcome,
        });
    }

    let labels = scenario.labels();
    let name = |address: &Address| {
        labels
            .iter()
            .find(|l| resolve(l) == *address)
            .cloned()
            .unwrap_or_else(|| address.to_string())
    };

    let positions = stream
        .positions()?
        .into_iter()
        .map(|(owner, position)| PositionReport { owner: name(&owner), position })
        .collect();

    let stream_params = stream.params();
    let assets = [&stream_params.in_asset, &stream_params.out_asset];
    let mut balances = Vec::new();
    let mut holders: Vec<(String, Address)> =
        labels.iter().map(|l| (l.clone(), resolve(l))).collect();
    holders.push(("custody".to_string(), *stream.custody()));
    holders.extend(
        vesting
            .grants()
            .iter()
            .map(|g| (format!("vesting:{}", name(&g.beneficiary)), g.wallet)),
    );
    for (owner, address) in holders {
        for asset in assets {
            let amount = bank.balance(asset, &address);
            if amount > 0 {
                balances.push(BalanceReport { owner: owner.clone(), asset: asset.clone(), amount });
            }
        }
    }

    let report = Report {
        stream_id: stream.id(),
        phase: stream.phase(),
        steps,
        state: stream.shared_state().clone(),
        average_price: stream.average_price()?,
        positions,
        balances,
        vesting: vesting.grants().to_vec(),
    };
    info!(
        stream = report.stream_id,
        phase = %report.phase,
        steps = report.steps.len(),
        rejected = report.rejected(),
        "scenario replayed"
    );
    Ok(report)
}

fn apply<L: StreamLedger>(
    stream: &mut Stream<L>,
    env: &mut Env<'_>,
    action: &ActionConfig,
) -> Result<Outcome, StreamError> {
    let sender = resolve(&action.sender);
    let amount = action.amount.unwrap_or_default();
    let outcome = match action.op {
        OpKind::Subscribe => Outcome::Subscribed(stream.subscribe(env, &sender, amount)?),
        OpKind::Withdraw => Outcome::Withdrew(stream.withdraw(env, &sender, amount)?),
        OpKind::Exit => Outcome::Exited(stream.exit_stream(env, &sender)?),
        OpKind::Finalize => Outcome::Finalized(stream.finalize_stream(env, &sender)?),
        OpKind::Cancel => Outcome::Cancelled(stream.cancel_stream(env, &sender)?),
        OpKind::CancelWithAdmin => Outcome::Cancelled(stream.cancel_with_admin(env, &sender)?),
        OpKind::SyncStream => Outcome::StreamSynced(stream.sync_stream_external(env)?),
        OpKind::SyncPosition => {
            let owner = action.owner.as_deref().map_or(sender, resolve);
            Outcome::PositionSynced(stream.sync_position_external(env, &owner)?)
        }
    };
    Ok(outcome)
}
