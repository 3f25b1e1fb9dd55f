//! Protocol constants.

/// Number of fractional digits carried by [`Decimal`](crate::decimal::Decimal).
pub const DECIMAL_PLACES: usize = 18;

/// Scale factor of [`Decimal`](crate::decimal::Decimal): `10^DECIMAL_PLACES`.
pub const DECIMAL_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Domain separator for deriving a stream's custody address from its id.
pub const CUSTODY_DOMAIN: &[u8] = b"sluice/custody/v1";

/// Domain separator for deriving addresses from human-readable labels.
pub const LABEL_DOMAIN: &[u8] = b"sluice/label/v1";

/// Domain separator for vesting wallet addresses issued by in-memory issuers.
pub const VESTING_DOMAIN: &[u8] = b"sluice/vesting/v1";
