//! Order processor: validate, then persist in one transaction.

use order_pipeline_core::money::PriceError;
use order_pipeline_core::order::OrderRecord;
use order_pipeline_core::store::{OrderStore, PersistOutcome, StoreError};
use order_pipeline_core::validation::{OrderValidator, ValidationError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors from [`OrderProcessor::process`].
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    /// The order violates a business invariant.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// An item price does not fit the store's decimal column.
    #[error("Price of item '{product}' not representable: {source}")]
    PriceConversion {
        /// Product of the offending item.
        product: String,
        /// Conversion failure.
        #[source]
        source: PriceError,
    },

    /// The store failed; retrying may succeed.
    #[error(transparent)]
    Store(StoreError),
}

impl ProcessError {
    /// Whether redelivering the same message can never succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Invalid(_) | Self::PriceConversion { .. } => true,
            Self::Store(e) => e.is_permanent(),
        }
    }
}

impl From<StoreError> for ProcessError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::PriceConversion { product, source } => {
                Self::PriceConversion { product, source }
            },
            other => Self::Store(other),
        }
    }
}

/// Validates an order and writes it through an [`OrderStore`].
///
/// The processor holds no state between calls; everything durable lives in
/// the store.
#[derive(Clone)]
pub struct OrderProcessor {
    store: Arc<dyn OrderStore>,
    validator: OrderValidator,
}

impl OrderProcessor {
    /// Create a processor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, validator: OrderValidator) -> Self {
        Self { store, validator }
    }

    /// Validate and persist an order with all its items atomically.
    ///
    /// An order whose code is already stored yields
    /// [`PersistOutcome::Duplicate`] and writes nothing.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Invalid`] if validation fails (nothing is written)
    /// - [`ProcessError::PriceConversion`] if a price does not fit the store
    /// - [`ProcessError::Store`] if the transaction fails
    pub async fn process(&self, order: &OrderRecord) -> Result<PersistOutcome, ProcessError> {
        self.validator.validate(order)?;

        let start = Instant::now();
        let outcome = self.store.persist_order(order).await?;
        metrics::histogram!("orders.process_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match outcome {
            PersistOutcome::Inserted { order_id, item_count } => {
                metrics::counter!("orders.processed").increment(1);
                tracing::info!(
                    order_code = %order.order_code,
                    customer_code = %order.customer_code,
                    order_id,
                    item_count,
                    "Order persisted"
                );
            },
            PersistOutcome::Duplicate { order_code } => {
                metrics::counter!("orders.duplicates").increment(1);
                tracing::info!(order_code = %order_code, "Order already persisted, skipping");
            },
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for OrderProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderProcessor")
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
