//! Conversion of wire prices into the store's exact decimal type.
//!
//! Prices travel as JSON numbers (`f64`) and are persisted as `NUMERIC(12,2)`.
//! Every conversion goes through [`to_store_price`] so the consumer, the
//! store, and the total computation agree on the same rounded value.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Digits after the decimal point in `order_items.price`.
pub const PRICE_SCALE: u32 = 2;

/// Total digits in `order_items.price`.
pub const PRICE_PRECISION: u32 = 12;

/// Errors converting a price into the store representation.
///
/// These are permanent: redelivering the same message cannot fix them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriceError {
    /// The value is NaN or infinite.
    #[error("Price is not a finite number: {0}")]
    NotFinite(f64),

    /// The value exceeds `NUMERIC(12,2)`.
    #[error("Price {price} exceeds NUMERIC({PRICE_PRECISION},{PRICE_SCALE})")]
    OutOfRange {
        /// The rejected wire value.
        price: f64,
    },

    /// The value rounds to zero or below at the column's scale.
    #[error("Price {price} is below the smallest storable unit of 0.01")]
    BelowSmallestUnit {
        /// The rejected wire value.
        price: f64,
    },

    /// Arithmetic on converted prices overflowed.
    #[error("Price arithmetic overflowed")]
    Overflow,
}

/// Largest absolute value a `NUMERIC(12,2)` column accepts, exclusive.
fn store_limit() -> Decimal {
    // 10^(precision - scale)
    Decimal::from(10_i64.pow(PRICE_PRECISION - PRICE_SCALE))
}

/// Convert a wire price into the value written to `order_items.price`.
///
/// Rounds half away from zero to two places, matching PostgreSQL's own
/// `NUMERIC` rounding on insert.
///
/// # Errors
///
/// Returns [`PriceError`] if the price is not finite, does not fit the
/// column after rounding, or rounds to zero or below (the column only
/// holds positive prices).
///
/// # Example
///
/// ```
/// use order_pipeline_core::money::to_store_price;
/// use order_pipeline_core::Decimal;
///
/// assert_eq!(to_store_price(1.5).unwrap(), Decimal::new(150, 2));
/// assert!(to_store_price(f64::NAN).is_err());
/// ```
pub fn to_store_price(price: f64) -> Result<Decimal, PriceError> {
    if !price.is_finite() {
        return Err(PriceError::NotFinite(price));
    }

    let decimal = Decimal::from_f64(price).ok_or(PriceError::OutOfRange { price })?;
    let rounded = decimal.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero);

    if rounded.abs() >= store_limit() {
        return Err(PriceError::OutOfRange { price });
    }
    if rounded <= Decimal::ZERO {
        return Err(PriceError::BelowSmallestUnit { price });
    }

    Ok(rounded)
}
