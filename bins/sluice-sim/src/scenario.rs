//! Scenario files for the simulator.
//!
//! A scenario describes one stream, the starting balances of every account
//! and a list of timed operations. Files are loaded with the `config` crate
//! (TOML, JSON or YAML, picked by extension), then overridden by environment
//! variables prefixed `SLUICE_` with `__` as the nesting separator, e.g.
//! `SLUICE_STREAM__THRESHOLD=5000`.
//!
//! Accounts are written as labels (`"alice"`) and mapped to addresses with
//! [`Address::from_label`]; a 64-character hex string is taken verbatim.

use std::path::Path;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use sluice_core::decimal::Decimal;
use sluice_core::types::{
    Address, AssetId, ProtocolParams, StreamParams, Timestamp, VestingSchedule, Window,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_stream_id")]
    pub stream_id: u64,
    pub protocol: ProtocolConfig,
    pub stream: StreamConfig,
    #[serde(default)]
    pub balances: Vec<BalanceConfig>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

fn default_stream_id() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    pub fee_collector: String,
    /// Decimal string such as `"0.01"`.
    pub exit_fee_ratio: String,
    pub protocol_admin: String,
    pub accepted_assets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub creator: String,
    pub in_asset: String,
    pub out_asset: String,
    pub out_supply: u64,
    pub bootstrapping_start: Timestamp,
    pub stream_start: Timestamp,
    pub stream_end: Timestamp,
    #[serde(default)]
    pub threshold: u64,
    /// Time the stream is created at.
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub subscriber_vesting: Option<VestingSchedule>,
    #[serde(default)]
    pub creator_vesting: Option<VestingSchedule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceConfig {
    pub owner: String,
    pub asset: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Subscribe,
    Withdraw,
    Exit,
    Finalize,
    Cancel,
    CancelWithAdmin,
    SyncStream,
    SyncPosition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    pub at: Timestamp,
    pub sender: String,
    pub op: OpKind,
    /// Required for `subscribe` and `withdraw`.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Target of `sync_position`; defaults to the sender.
    #[serde(default)]
    pub owner: Option<String>,
}

impl ScenarioConfig {
    /// Load a scenario file with `SLUICE_` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let scenario: Self = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("SLUICE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to build scenario configuration")?
            .try_deserialize()
            .context("failed to deserialize scenario")?;

        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject scenarios whose actions are missing required fields.
    pub fn validate(&self) -> Result<()> {
        for (i, action) in self.actions.iter().enumerate() {
            if matches!(action.op, OpKind::Subscribe | OpKind::Withdraw) && action.amount.is_none() {
                bail!("action {i} ({:?} at {}) needs an amount", action.op, action.at);
            }
        }
        self.protocol_params()?;
        Ok(())
    }

    pub fn protocol_params(&self) -> Result<ProtocolParams> {
        let p = &self.protocol;
        let exit_fee_ratio: Decimal = p
            .exit_fee_ratio
            .parse()
            .with_context(|| format!("invalid exit_fee_ratio {:?}", p.exit_fee_ratio))?;
        Ok(ProtocolParams {
            fee_collector: resolve(&p.fee_collector),
            exit_fee_ratio,
            protocol_admin: resolve(&p.protocol_admin),
            accepted_assets: p.accepted_assets.iter().map(AssetId::new).collect(),
        })
    }

    pub fn stream_params(&self) -> StreamParams {
        let s = &self.stream;
        StreamParams {
            creator: resolve(&s.creator),
            in_asset: AssetId::new(&s.in_asset),
            out_asset: AssetId::new(&s.out_asset),
            out_supply: s.out_supply,
            window: Window {
                bootstrapping_start: s.bootstrapping_start,
                stream_start: s.stream_start,
                stream_end: s.stream_end,
            },
            threshold: s.threshold,
            subscriber_vesting: s.subscriber_vesting,
            creator_vesting: s.creator_vesting,
        }
    }

    /// Every account label the scenario mentions, deduplicated in order of
    /// first appearance.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        let mentioned = [
            &self.stream.creator,
            &self.protocol.fee_collector,
            &self.protocol.protocol_admin,
        ]
        .into_iter()
        .chain(self.balances.iter().map(|b| &b.owner))
        .chain(self.actions.iter().map(|a| &a.sender));
        for label in mentioned {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        labels
    }
}

/// Address for an account label or a hex-encoded address.
pub fn resolve(label: &str) -> Address {
    if label.len() == 64 {
        if let Ok(address) = label.parse() {
            return address;
        }
    }
    Address::from_label(label)
}
