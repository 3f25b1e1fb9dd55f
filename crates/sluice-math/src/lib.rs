//! # sluice-math — Distribution accounting engine.
//!
//! All functions are pure: they take values and return new values, with no
//! stored state and no side effects. Integer arithmetic only, with `u128`
//! intermediates and checked operations throughout.
//!
//! - **Time fraction**: share of the *remaining* window elapsed since the
//!   last checkpoint, so compounding over any number of checkpoints releases
//!   exactly everything by `stream_end`.
//! - **Distribution**: releases that fraction of the remaining output into a
//!   cumulative per-share index and consumes the same fraction of input.
//! - **Position sync**: reconstructs one participant's earned output and
//!   unspent deposit from the index difference, in constant time.
//! - **Phase derivation**: time-driven phase with sticky terminal outcomes.

pub mod distribution;
pub mod phase;
pub mod sync;

pub use distribution::{
    advance, apply_time_fraction, compute_exit_fee, compute_share_amount, compute_time_fraction,
};
pub use phase::derive_phase;
pub use sync::sync_position;
