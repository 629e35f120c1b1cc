//! The order entity carried through the pipeline.
//!
//! An [`OrderRecord`] is built once by the front door, serialized by the
//! publisher, and persisted as a copy by the consumer. Nothing in the
//! pipeline mutates it after publication.
//!
//! # Example
//!
//! ```
//! use order_pipeline_core::Decimal;
//! use order_pipeline_core::order::{CustomerCode, OrderCode, OrderItem, OrderRecord};
//! use chrono::{TimeZone, Utc};
//!
//! let order = OrderRecord::new(
//!     OrderCode::new(1001),
//!     CustomerCode::new(1),
//!     vec![OrderItem::new("pen", 10, 1.50)],
//!     Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
//! );
//!
//! assert_eq!(order.total().unwrap(), Decimal::new(1500, 2));
//! ```

use crate::money::{self, PriceError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Business identifier of an order, unique across the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderCode(i64);

impl OrderCode {
    /// Wrap a raw order code.
    #[must_use]
    pub const fn new(code: i64) -> Self {
        Self(code)
    }

    /// The raw value as stored in the `orders.code` column.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderCode {
    fn from(code: i64) -> Self {
        Self(code)
    }
}

/// Identifier of the customer who placed an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerCode(i32);

impl CustomerCode {
    /// Wrap a raw customer code.
    #[must_use]
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// The raw value as stored in the `orders.customer_code` column.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for CustomerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for CustomerCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

/// One line of an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Product name, free text.
    pub product: String,
    /// Units ordered.
    pub quantity: i32,
    /// Unit price as carried on the wire.
    pub price: f64,
}

impl OrderItem {
    /// Create an item.
    #[must_use]
    pub fn new(product: impl Into<String>, quantity: i32, price: f64) -> Self {
        Self {
            product: product.into(),
            quantity,
            price,
        }
    }

    /// Unit price in the store's exact representation.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError`] if the price does not fit `NUMERIC(12,2)`.
    pub fn unit_price(&self) -> Result<Decimal, PriceError> {
        money::to_store_price(self.price)
    }

    /// `quantity × unit_price`, exact.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError`] if the price is not representable or the
    /// multiplication overflows.
    pub fn line_total(&self) -> Result<Decimal, PriceError> {
        self.unit_price()?
            .checked_mul(Decimal::from(self.quantity))
            .ok_or(PriceError::Overflow)
    }
}

/// An order as it travels from the front door to the store.
///
/// The JSON field names (`customerCode`, `orderCode`, `items`, `createdAt`)
/// are the wire contract between publisher and consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    /// Customer who placed the order.
    pub customer_code: CustomerCode,
    /// Business identifier of the order.
    pub order_code: OrderCode,
    /// Line items, in the order they were submitted.
    pub items: Vec<OrderItem>,
    /// Creation time, UTC.
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Assemble an order record.
    #[must_use]
    pub const fn new(
        order_code: OrderCode,
        customer_code: CustomerCode,
        items: Vec<OrderItem>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_code,
            order_code,
            items,
            created_at,
        }
    }

    /// Σ `quantity × price` over all items, in exact decimal arithmetic.
    ///
    /// Prices are rounded to the store's two decimal places before summing, so
    /// this matches what a SQL sum over `order_items` returns and does not
    /// depend on item order.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError`] if any price is not representable or the sum
    /// overflows.
    pub fn total(&self) -> Result<Decimal, PriceError> {
        self.items.iter().try_fold(Decimal::ZERO, |acc, item| {
            acc.checked_add(item.line_total()?)
                .ok_or(PriceError::Overflow)
        })
        .map(|total| total.round_dp(money::PRICE_SCALE))
    }

    /// Total units across all items.
    #[must_use]
    pub fn unit_count(&self) -> i64 {
        self.items.iter().map(|item| i64::from(item.quantity)).sum()
    }
}
