//! Order publisher.
//!
//! [`OrderPublisher`] validates an [`OrderRecord`], encodes it, and hands it to
//! a [`MessageBroker`] with the queue name as routing key. It does not retry;
//! the caller gets a definite success or failure for each call.

use crate::broker::{BrokerError, MessageBroker, OutboundMessage};
use crate::codec::{self, CodecError};
use crate::environment::Clock;
use crate::order::OrderRecord;
use crate::validation::{OrderValidator, ValidationError};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`OrderPublisher::publish`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The record failed validation; the broker was not contacted.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The record could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The broker did not accept the message.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Publishes orders to the pipeline queue.
#[derive(Clone)]
pub struct OrderPublisher {
    broker: Arc<dyn MessageBroker>,
    routing_key: String,
    validator: OrderValidator,
    clock: Arc<dyn Clock>,
}

impl OrderPublisher {
    /// Create a publisher routing to `queue`.
    #[must_use]
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        queue: impl Into<String>,
        validator: OrderValidator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            broker,
            routing_key: queue.into(),
            validator,
            clock,
        }
    }

    /// Routing key used for every publish.
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Validate, encode, and publish an order.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Invalid`] if the record fails validation
    /// - [`PublishError::Codec`] if encoding fails
    /// - [`PublishError::Broker`] if the broker refuses or times out
    pub async fn publish(&self, order: &OrderRecord) -> Result<(), PublishError> {
        self.validator.validate(order)?;

        let payload = codec::encode(order)?;
        let size_bytes = payload.len();
        let message = OutboundMessage::new(payload, codec::CONTENT_TYPE, self.clock.now());

        self.broker.publish(&self.routing_key, &message).await?;

        metrics::counter!("orders.published").increment(1);
        tracing::info!(
            order_code = %order.order_code,
            customer_code = %order.customer_code,
            routing_key = %self.routing_key,
            size_bytes,
            "Order published"
        );
        Ok(())
    }
}

impl std::fmt::Debug for OrderPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderPublisher")
            .field("routing_key", &self.routing_key)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
