//! Order store trait and related types.
//!
//! The store owns the relational connection pool and persists one
//! [`OrderRecord`] with all its items as a single transaction.
//!
//! # Implementations
//!
//! - `PostgresOrderStore` (in `order-pipeline-postgres`): production
//! - `InMemoryOrderStore` (in `order-pipeline-testing`): tests, with failure injection

use crate::money::PriceError;
use crate::order::{OrderCode, OrderRecord};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while persisting orders.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Could not connect to the database at startup.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A row violated a table constraint.
    #[error("Constraint '{constraint}' violated: {message}")]
    ConstraintViolation {
        /// Name of the constraint, if the database reported one.
        constraint: String,
        /// Database message.
        message: String,
    },

    /// An item price does not fit the price column.
    #[error("Price of item '{product}' not representable: {source}")]
    PriceConversion {
        /// Product of the offending item.
        product: String,
        /// Conversion failure.
        #[source]
        source: PriceError,
    },

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Any other database failure (pool timeout, I/O, transaction abort).
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl StoreError {
    /// Whether retrying the same write can never succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::PriceConversion { .. })
    }
}

/// Result of persisting an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The order and its items were written.
    Inserted {
        /// Surrogate key of the new `orders` row.
        order_id: i64,
        /// Number of `order_items` rows written.
        item_count: usize,
    },
    /// An order with the same code already exists; nothing was written.
    Duplicate {
        /// The conflicting code.
        order_code: OrderCode,
    },
}

impl PersistOutcome {
    /// Whether this call wrote rows.
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

/// Trait for order store implementations.
///
/// # Atomicity
///
/// `persist_order` writes the order row and every item row in one transaction.
/// On any error nothing is visible.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so the store can be held as
/// `Arc<dyn OrderStore>` by the processor.
pub trait OrderStore: Send + Sync {
    /// Persist an order and its items atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PriceConversion`] if an item price does not fit
    /// the price column, or another [`StoreError`] if the transaction fails.
    fn persist_order<'a>(
        &'a self,
        order: &'a OrderRecord,
    ) -> Pin<Box<dyn Future<Output = Result<PersistOutcome, StoreError>> + Send + 'a>>;
}
