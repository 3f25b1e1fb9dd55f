//! Time-weighted distribution of the output pool.
//!
//! At every checkpoint the stream releases the fraction of its *remaining*
//! output that corresponds to the elapsed share of its *remaining* window,
//! and consumes the same fraction of the unspent input. The released output
//! is credited to a cumulative per-share index that positions read lazily.

use sluice_core::decimal::{mul_div, Decimal, Rounding};
use sluice_core::error::MathError;
use sluice_core::types::{SharedState, Timestamp, Window};

/// Elapsed fraction of the remaining window since `last_updated`.
///
/// Returns 0 before `stream_start`, once `last_updated` has reached
/// `stream_end`, or when no time has effectively elapsed. Otherwise returns
/// `(min(now, end) − max(last, start)) / (end − max(last, start))`, which is
/// in `[0, 1]` and equals 1 exactly when `now ≥ stream_end`.
pub fn compute_time_fraction(
    now: Timestamp,
    stream_start: Timestamp,
    stream_end: Timestamp,
    last_updated: Timestamp,
) -> Result<Decimal, MathError> {
    if now < stream_start || last_updated >= stream_end {
        return Ok(Decimal::ZERO);
    }

    let eff_last = last_updated.max(stream_start);
    let eff_now = now.min(stream_end);
    if eff_now <= eff_last {
        return Ok(Decimal::ZERO);
    }

    Decimal::from_ratio(
        (eff_now - eff_last) as u128,
        (stream_end - eff_last) as u128,
    )
}

/// Release `fraction` of the remaining output and consume `fraction` of the
/// unspent input.
///
/// No-op when there are no shares or the fraction is zero. Consumed input is
/// always booked; the index and price only move when a non-zero amount of
/// output is actually released.
pub fn apply_time_fraction(
    state: &SharedState,
    fraction: Decimal,
) -> Result<SharedState, MathError> {
    if state.shares == 0 || fraction.is_zero() {
        return Ok(state.clone());
    }

    let distributed_out = to_u64(fraction.mul_floor(state.out_remaining as u128)?)?;
    let consumed_in = to_u64(fraction.mul_floor(state.in_supply as u128)?)?;

    let mut next = state.clone();
    next.spent_in = next
        .spent_in
        .checked_add(consumed_in)
        .ok_or(MathError::ArithmeticOverflow)?;
    next.in_supply = next
        .in_supply
        .checked_sub(consumed_in)
        .ok_or(MathError::ArithmeticOverflow)?;

    if distributed_out > 0 {
        next.out_remaining = next
            .out_remaining
            .checked_sub(distributed_out)
            .ok_or(MathError::ArithmeticOverflow)?;
        let increment = Decimal::from_ratio(distributed_out as u128, state.shares)?;
        next.dist_index = next.dist_index.checked_add(increment)?;
        next.current_streamed_price =
            Decimal::from_ratio(consumed_in as u128, distributed_out as u128)?;
    }

    Ok(next)
}

/// Bring the shared state up to `now`.
///
/// Applies the elapsed time fraction and moves the checkpoint forward.
/// The checkpoint never moves backward, so a stale `now` is a no-op.
pub fn advance(
    state: &SharedState,
    window: &Window,
    now: Timestamp,
) -> Result<SharedState, MathError> {
    let fraction = compute_time_fraction(
        now,
        window.stream_start,
        window.stream_end,
        state.last_updated,
    )?;
    let mut next = apply_time_fraction(state, fraction)?;
    next.last_updated = state.last_updated.max(now);
    Ok(next)
}

/// Shares corresponding to `amount_in` of input.
///
/// The first deposit into an empty pool (or a zero amount) maps one unit to
/// one share. Otherwise `total_shares * amount_in / in_supply`, rounded down
/// for subscriptions and up for withdrawals so that rounding never favours
/// the caller.
///
/// # Errors
///
/// [`MathError::DivisionByZero`] if shares are outstanding while `in_supply`
/// is zero.
pub fn compute_share_amount(
    amount_in: u64,
    rounding: Rounding,
    in_supply: u64,
    total_shares: u128,
) -> Result<u128, MathError> {
    if total_shares == 0 || amount_in == 0 {
        return Ok(amount_in as u128);
    }
    mul_div(total_shares, amount_in as u128, in_supply as u128, rounding)
}

/// Split `spent_in` into `(fee, remainder)` with `fee = floor(spent_in * fee_ratio)`.
///
/// # Errors
///
/// [`MathError::ArithmeticOverflow`] if `fee_ratio` exceeds one.
pub fn compute_exit_fee(spent_in: u64, fee_ratio: Decimal) -> Result<(u64, u64), MathError> {
    let fee = to_u64(fee_ratio.mul_floor(spent_in as u128)?)?;
    let remainder = spent_in
        .checked_sub(fee)
        .ok_or(MathError::ArithmeticOverflow)?;
    Ok((fee, remainder))
}

fn to_u64(value: u128) -> Result<u64, MathError> {
    u64::try_from(value).map_err(|_| MathError::ArithmeticOverflow)
}
