//! Error types for the Sluice protocol.
//!
//! Every failure is terminal for the operation that raised it: nothing is
//! caught or retried internally, and a failed operation leaves no state
//! change and no value movement behind.
use thiserror::Error;

use crate::types::Phase;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("division by zero")] DivisionByZero,
    #[error("arithmetic overflow")] ArithmeticOverflow,
    #[error("invalid decimal literal: {0}")] InvalidLiteral(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient {asset} balance: have {have}, need {need}")] InsufficientBalance { asset: String, have: u64, need: u64 },
    #[error("transfer rejected: {0}")] Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend: {0}")] Backend(String),
    #[error("codec: {0}")] Codec(String),
    #[error("stream record missing")] MissingRecord,
    #[error("stream record already exists")] RecordExists,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VestingError {
    #[error("vesting schedule rejected: {0}")] Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid amount")] InvalidAmount,
    #[error("unauthorized")] Unauthorized,
    #[error("{operation} not allowed in phase {phase}")] OperationNotAllowed { operation: &'static str, phase: Phase },
    #[error("invalid position")] InvalidPosition,
    #[error("withdraw amount {requested} exceeds balance {available}")] WithdrawAmountExceedsBalance { requested: u64, available: u64 },
    #[error("insufficient out amount: have {have}, need {need}")] InsufficientOutAmount { have: u64, need: u64 },
    #[error("exit not allowed in phase {0}")] InvalidExitCondition(Phase),
    #[error("invalid stream window")] InvalidWindow,
    #[error("vesting cliff exceeds vesting duration")] InvalidVestingSchedule,
    #[error("in and out assets must differ")] SameAssets,
    #[error("asset not accepted: {0}")] AssetNotAccepted(String),
    #[error("exit fee ratio must not exceed one")] InvalidFeeRatio,
    #[error(transparent)] Math(#[from] MathError),
    #[error(transparent)] Transfer(#[from] TransferError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Vesting(#[from] VestingError),
}

impl StreamError {
    /// Shorthand for a phase rejection.
    pub fn not_allowed(operation: &'static str, phase: Phase) -> Self {
        Self::OperationNotAllowed { operation, phase }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_error_converts_into_stream_error() {
        let err: StreamError = MathError::DivisionByZero.into();
        assert_eq!(err, StreamError::Math(MathError::DivisionByZero));
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn not_allowed_names_operation_and_phase() {
        let err = StreamError::not_allowed("subscribe", Phase::Waiting);
        assert_eq!(err.to_string(), "subscribe not allowed in phase waiting");
    }

    #[test]
    fn insufficient_balance_message() {
        let err = TransferError::InsufficientBalance {
            asset: "uusdc".into(),
            have: 5,
            need: 10,
        };
        assert_eq!(err.to_string(), "insufficient uusdc balance: have 5, need 10");
    }
}
