//! Lazy per-position synchronization against the shared accumulator.
//!
//! A position never stores its live balance. Its earned output is
//! `shares × (dist_index − index)` plus the carried fractional remainder, and
//! its unspent deposit is its pro-rata slice of the shared `in_supply`. Both
//! are reconstructed here, touching no other position.

use sluice_core::decimal::{mul_div, Decimal, Rounding};
use sluice_core::error::MathError;
use sluice_core::types::{Position, Timestamp};

/// Bring `position` up to date with the shared state.
///
/// With outstanding shares, credits the integer part of the earned output to
/// `purchased`, keeps the fractional part as `pending_reward`, and moves the
/// consumed part of the deposit from `in_balance` to `spent_in`. With no
/// shares outstanding only the observed index and timestamp advance.
///
/// The pro-rata balance is floored and never exceeds the current
/// `in_balance`, so a sync can only consume deposit, never mint it.
pub fn sync_position(
    position: &Position,
    dist_index: Decimal,
    total_shares: u128,
    in_supply: u64,
    now: Timestamp,
) -> Result<Position, MathError> {
    let mut next = position.clone();

    if total_shares > 0 {
        let index_diff = dist_index.checked_sub(position.index)?;
        let earned = index_diff
            .mul_int(position.shares)?
            .checked_add(position.pending_reward)?;
        let (whole, remainder) = earned.to_integer_with_remainder();
        let whole = u64::try_from(whole).map_err(|_| MathError::ArithmeticOverflow)?;

        next.purchased = next
            .purchased
            .checked_add(whole)
            .ok_or(MathError::ArithmeticOverflow)?;
        next.pending_reward = remainder;

        let pro_rata = mul_div(in_supply as u128, position.shares, total_shares, Rounding::Down)?;
        let in_remaining = u64::try_from(pro_rata)
            .map_err(|_| MathError::ArithmeticOverflow)?
            .min(position.in_balance);
        let consumed = position.in_balance - in_remaining;

        next.spent_in = next
            .spent_in
            .checked_add(consumed)
            .ok_or(MathError::ArithmeticOverflow)?;
        next.in_balance = in_remaining;
    }

    next.index = dist_index;
    next.last_update_time = now;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(num: u128, den: u128) -> Decimal {
        Decimal::from_ratio(num, den).unwrap()
    }

    fn holder(in_balance: u64, shares: u128) -> Position {
        Position { in_balance, shares, ..Position::default() }
    }

    #[test]
    fn sole_holder_earns_everything_released() {
        // 500 out released over 400 shares, half the input consumed.
        let p = holder(400, 400);
        let synced = sync_position(&p, dec(5, 4), 400, 200, 10).unwrap();
        assert_eq!(synced.purchased, 500);
        assert_eq!(synced.pending_reward, Decimal::ZERO);
        assert_eq!(synced.in_balance, 200);
        assert_eq!(synced.spent_in, 200);
        assert_eq!(synced.index, dec(5, 4));
        assert_eq!(synced.last_update_time, 10);
    }

    #[test]
    fn fractional_reward_is_carried() {
        // 1 share at index 1/3 earns 0.333..., nothing whole yet.
        let p = holder(1, 1);
        let once = sync_position(&p, dec(1, 3), 3, 3, 1).unwrap();
        assert_eq!(once.purchased, 0);
        assert_eq!(once.pending_reward, dec(1, 3));

        // Three such increments add up to a whole unit (minus truncation dust).
        let twice = sync_position(&once, dec(2, 3), 3, 3, 2).unwrap();
        let thrice = sync_position(&twice, Decimal::ONE, 3, 3, 3).unwrap();
        assert_eq!(thrice.purchased, 1);
        assert!(thrice.pending_reward < Decimal::from_raw(10));
    }

    #[test]
    fn zero_total_shares_only_moves_index_and_time() {
        let p = holder(50, 0);
        let synced = sync_position(&p, dec(7, 1), 0, 0, 99).unwrap();
        assert_eq!(synced.in_balance, 50);
        assert_eq!(synced.purchased, 0);
        assert_eq!(synced.index, dec(7, 1));
        assert_eq!(synced.last_update_time, 99);
    }

    #[test]
    fn fresh_position_adopts_current_index_without_earning() {
        let p = Position::default();
        let synced = sync_position(&p, dec(42, 1), 1_000, 1_000, 5).unwrap();
        assert_eq!(synced.purchased, 0);
        assert_eq!(synced.in_balance, 0);
        assert_eq!(synced.index, dec(42, 1));
    }

    #[test]
    fn pro_rata_split_between_two_holders() {
        // 300 + 100 shares, 200 of 400 input left, 1_000 out released.
        let index = dec(1_000, 400);
        let a = sync_position(&holder(300, 300), index, 400, 200, 1).unwrap();
        let b = sync_position(&holder(100, 100), index, 400, 200, 1).unwrap();
        assert_eq!(a.purchased, 750);
        assert_eq!(b.purchased, 250);
        assert_eq!(a.in_balance, 150);
        assert_eq!(b.in_balance, 50);
        assert_eq!(a.spent_in + b.spent_in, 200);
    }

    #[test]
    fn sync_is_idempotent() {
        let p = holder(400, 400);
        let once = sync_position(&p, dec(5, 4), 400, 200, 10).unwrap();
        let twice = sync_position(&once, dec(5, 4), 400, 200, 10).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn decreasing_index_is_rejected() {
        let p = Position { index: dec(2, 1), shares: 1, ..Position::default() };
        assert_eq!(
            sync_position(&p, dec(1, 1), 1, 1, 0),
            Err(MathError::ArithmeticOverflow)
        );
    }

    proptest! {
        #[test]
        fn deposit_is_conserved(
            in_balance in 0u64..1_000_000,
            shares in 1u128..1_000_000,
            extra_shares in 0u128..1_000_000,
            consumed_bps in 0u64..=10_000,
        ) {
            let total = shares + extra_shares;
            let total_in = in_balance as u128 * total / shares;
            let in_supply = (total_in - total_in * consumed_bps as u128 / 10_000) as u64;
            let p = holder(in_balance, shares);
            let synced = sync_position(&p, Decimal::ZERO, total, in_supply, 1).unwrap();
            prop_assert_eq!(synced.in_balance + synced.spent_in, in_balance);
            prop_assert!(synced.in_balance <= in_balance);
        }

        #[test]
        fn earned_never_exceeds_released(
            shares in 1u128..1_000_000,
            others in 0u128..1_000_000,
            released in 0u64..1_000_000_000,
        ) {
            let total = shares + others;
            let index = Decimal::from_ratio(released as u128, total).unwrap();
            let synced = sync_position(&holder(0, shares), index, total, 0, 1).unwrap();
            prop_assert!(synced.purchased as u128 <= released as u128 * shares / total);
        }
    }
}
