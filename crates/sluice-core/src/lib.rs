//! # sluice-core
//! Foundation types and traits for the Sluice streaming exchange.

pub mod constants;
pub mod decimal;
pub mod error;
pub mod traits;
pub mod types;

pub use decimal::{Decimal, Rounding};
