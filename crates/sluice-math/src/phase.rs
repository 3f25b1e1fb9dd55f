//! Time-driven phase derivation.

use sluice_core::types::{Phase, Timestamp, Window};

/// Phase of a stream at `now`.
///
/// Terminal phases are returned unchanged. Otherwise the phase is derived
/// purely from `now` against the window boundaries:
/// `[.., bootstrapping_start)` waiting, `[bootstrapping_start, stream_start)`
/// bootstrapping, `[stream_start, stream_end)` active, `[stream_end, ..)` ended.
pub fn derive_phase(current: Phase, now: Timestamp, window: &Window) -> Phase {
    if current.is_terminal() {
        return current;
    }

    if now < window.bootstrapping_start {
        Phase::Waiting
    } else if now < window.stream_start {
        Phase::Bootstrapping
    } else if now < window.stream_end {
        Phase::Active
    } else {
        Phase::Ended
    }
}
