//! Front door request for creating an order.

use order_pipeline_core::environment::Clock;
use order_pipeline_core::order::{CustomerCode, OrderCode, OrderItem, OrderRecord};
use serde::{Deserialize, Serialize};

/// An order as submitted by a caller, before it is stamped with a creation
/// time.
///
/// # Example
///
/// ```
/// use order_pipeline_service::request::CreateOrderRequest;
/// use order_pipeline_core::environment::SystemClock;
///
/// let request: CreateOrderRequest = serde_json::from_str(
///     r#"{"orderCode": 1001, "customerCode": 1, "items": [{"product": "pen", "quantity": 10, "price": 1.5}]}"#,
/// ).unwrap();
///
/// let order = request.into_record(&SystemClock);
/// assert_eq!(order.items.len(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Business identifier of the order.
    pub order_code: i64,
    /// Customer placing the order.
    pub customer_code: i32,
    /// Line items, in submission order.
    pub items: Vec<OrderItem>,
}

impl CreateOrderRequest {
    /// Build the order record, with `createdAt` read from `clock`.
    ///
    /// Items keep their order and count.
    #[must_use]
    pub fn into_record(self, clock: &dyn Clock) -> OrderRecord {
        OrderRecord::new(
            OrderCode::new(self.order_code),
            CustomerCode::new(self.customer_code),
            self.items,
            clock.now(),
        )
    }
}
