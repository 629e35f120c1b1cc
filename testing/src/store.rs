//! In-memory order store with failure injection.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use order_pipeline_core::order::{OrderCode, OrderRecord};
use order_pipeline_core::store::{OrderStore, PersistOutcome, StoreError};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct State {
    orders: BTreeMap<OrderCode, (i64, OrderRecord)>,
    next_id: i64,
    failures: VecDeque<StoreError>,
    persist_calls: usize,
}

/// In-memory [`OrderStore`] for fast, deterministic tests.
///
/// Behaves like the relational store where the consumer can tell:
/// - a second order with the same code is a [`PersistOutcome::Duplicate`]
/// - an unrepresentable price fails with [`StoreError::PriceConversion`]
///   and writes nothing
/// - injected failures are returned before anything is written
///
/// # Example
///
/// ```
/// use order_pipeline_testing::{InMemoryOrderStore, sample_order};
/// use order_pipeline_core::store::{OrderStore, StoreError};
///
/// # async fn example() {
/// let store = InMemoryOrderStore::new();
/// store.fail_next(1, StoreError::DatabaseError("connection reset".into()));
///
/// assert!(store.persist_order(&sample_order(1)).await.is_err());
/// assert!(store.persist_order(&sample_order(1)).await.is_ok());
/// assert_eq!(store.len(), 1);
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes with `error`.
    pub fn fail_next(&self, count: usize, error: StoreError) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .extend(std::iter::repeat_n(error, count));
    }

    /// Number of `persist_order` calls, failed ones included.
    #[must_use]
    pub fn persist_calls(&self) -> usize {
        self.state.lock().unwrap().persist_calls
    }

    /// Stored orders, ordered by code.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRecord> {
        self.state
            .lock()
            .unwrap()
            .orders
            .values()
            .map(|(_, order)| order.clone())
            .collect()
    }

    /// Look up one order by code.
    #[must_use]
    pub fn order(&self, code: OrderCode) -> Option<OrderRecord> {
        self.state
            .lock()
            .unwrap()
            .orders
            .get(&code)
            .map(|(_, order)| order.clone())
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    /// Whether no order is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().orders.is_empty()
    }

    /// Number of stored item rows across all orders.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .orders
            .values()
            .map(|(_, order)| order.items.len())
            .sum()
    }

    fn persist(&self, order: &OrderRecord) -> Result<PersistOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.persist_calls += 1;

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if state.orders.contains_key(&order.order_code) {
            return Ok(PersistOutcome::Duplicate {
                order_code: order.order_code,
            });
        }
        for item in &order.items {
            item.unit_price()
                .map_err(|source| StoreError::PriceConversion {
                    product: item.product.clone(),
                    source,
                })?;
        }

        state.next_id += 1;
        let order_id = state.next_id;
        state
            .orders
            .insert(order.order_code, (order_id, order.clone()));
        Ok(PersistOutcome::Inserted {
            order_id,
            item_count: order.items.len(),
        })
    }
}

impl OrderStore for InMemoryOrderStore {
    fn persist_order<'a>(
        &'a self,
        order: &'a OrderRecord,
    ) -> Pin<Box<dyn Future<Output = Result<PersistOutcome, StoreError>> + Send + 'a>> {
        let result = self.persist(order);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sample_order;
    use order_pipeline_core::order::OrderItem;

    #[tokio::test]
    async fn duplicate_code_is_not_written_twice() {
        let store = InMemoryOrderStore::new();
        let first = store.persist_order(&sample_order(7)).await.expect("persist");
        let second = store.persist_order(&sample_order(7)).await.expect("persist");

        assert!(first.is_inserted());
        assert_eq!(
            second,
            PersistOutcome::Duplicate {
                order_code: OrderCode::new(7)
            }
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.persist_calls(), 2);
    }

    #[tokio::test]
    async fn unrepresentable_price_writes_nothing() {
        let store = InMemoryOrderStore::new();
        let mut order = sample_order(8);
        order.items.push(OrderItem::new("yacht", 1, 1e12));

        let err = store.persist_order(&order).await.expect_err("should fail");
        assert!(err.is_permanent());
        assert!(store.is_empty());
        assert_eq!(store.item_count(), 0);
    }

    #[tokio::test]
    async fn sub_cent_price_is_rejected_like_the_price_column() {
        let store = InMemoryOrderStore::new();
        let mut order = sample_order(10);
        order.items.push(OrderItem::new("dust", 1, 0.001));

        let err = store.persist_order(&order).await.expect_err("should fail");
        assert!(err.is_permanent());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_come_first() {
        let store = InMemoryOrderStore::new();
        store.fail_next(2, StoreError::DatabaseError("down".to_string()));

        assert!(store.persist_order(&sample_order(9)).await.is_err());
        assert!(store.persist_order(&sample_order(9)).await.is_err());
        assert!(store.persist_order(&sample_order(9)).await.is_ok());
        assert_eq!(store.order(OrderCode::new(9)), Some(sample_order(9)));
    }
}
