//! Message broker abstraction for the order pipeline.
//!
//! The [`MessageBroker`] trait is the seam between the pipeline and its
//! transport. Publishers hand it opaque payloads with a routing key; consumers
//! subscribe to a queue and receive [`Delivery`] values that must be
//! acknowledged or rejected explicitly.
//!
//! # Delivery semantics
//!
//! ```text
//!  publish ──► exchange ──(routing key)──► queue ──► Delivery
//!                                                     │
//!                               ┌─────────────────────┼──────────────────┐
//!                               ▼                     ▼                  ▼
//!                             ack()          reject(requeue=true)  reject(requeue=false)
//!                           (removed)         (back to queue)        (dropped)
//! ```
//!
//! - **At-least-once**: a delivery that is neither acked nor rejected before the
//!   connection drops is redelivered.
//! - **One in flight**: implementations deliver at most one unacknowledged
//!   message per subscription.
//!
//! # Implementations
//!
//! - `AmqpBroker` (in `order-pipeline-amqp`): RabbitMQ over AMQP 0-9-1
//! - `InMemoryBroker` (in `order-pipeline-testing`): deterministic tests

use chrono::{DateTime, Utc};
use futures::Stream;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Header carrying the number of failed attempts on a dead-lettered message.
pub const ATTEMPTS_HEADER: &str = "x-attempts";

/// Header carrying the last processing error on a dead-lettered message.
pub const LAST_ERROR_HEADER: &str = "x-last-error";

/// Suffix appended to a queue name to form its dead-letter queue.
pub const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// Name of the dead-letter queue (and its routing key) for `queue`.
///
/// ```
/// use order_pipeline_core::broker::dead_letter_queue;
///
/// assert_eq!(dead_letter_queue("orders"), "orders.dead-letter");
/// ```
#[must_use]
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}{DEAD_LETTER_SUFFIX}")
}

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to declare an exchange, queue, or binding.
    #[error("Topology declaration failed for '{name}': {reason}")]
    TopologyFailed {
        /// Exchange or queue being declared.
        name: String,
        /// The reason for failure.
        reason: String,
    },

    /// The broker refused or failed to accept a message.
    #[error("Publish failed for routing key '{routing_key}': {reason}")]
    PublishFailed {
        /// The routing key used.
        routing_key: String,
        /// The reason for failure.
        reason: String,
    },

    /// The broker did not confirm a publish in time.
    #[error("Publish to '{routing_key}' not confirmed within {timeout_ms}ms")]
    PublishTimeout {
        /// The routing key used.
        routing_key: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// Failed to start consuming from a queue.
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// The queue that failed.
        queue: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to ack or reject a delivery.
    #[error("Acknowledgement failed for delivery {delivery_tag}: {reason}")]
    AcknowledgementFailed {
        /// Tag of the delivery.
        delivery_tag: u64,
        /// The reason for failure.
        reason: String,
    },

    /// Network or transport error.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// String headers attached to a message.
pub type MessageHeaders = BTreeMap<String, String>;

/// A message ready to be handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Encoded body.
    pub payload: Vec<u8>,
    /// MIME type of the body.
    pub content_type: String,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
    /// Application headers.
    pub headers: MessageHeaders,
}

impl OutboundMessage {
    /// Create a message with no headers.
    #[must_use]
    pub fn new(payload: Vec<u8>, content_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            payload,
            content_type: content_type.into(),
            timestamp,
            headers: MessageHeaders::new(),
        }
    }

    /// Add an application header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Settles a delivery with the broker.
///
/// Implemented by each transport; [`Delivery`] calls it at most once.
pub trait Acknowledger: Send + Sync {
    /// Positively acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgementFailed`] if the broker did not
    /// accept the ack.
    fn ack(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Negatively acknowledge the delivery, optionally returning it to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgementFailed`] if the broker did not
    /// accept the rejection.
    fn reject(
        &self,
        requeue: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}

/// A message received from a queue, pending acknowledgement.
pub struct Delivery {
    /// Broker-assigned tag, unique per channel.
    pub delivery_tag: u64,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
    /// Encoded body.
    pub payload: Vec<u8>,
    /// Application headers.
    pub headers: MessageHeaders,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Wrap a received message with the handle that settles it.
    #[must_use]
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        payload: Vec<u8>,
        headers: MessageHeaders,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            redelivered,
            payload,
            headers,
            acker,
        }
    }

    /// Acknowledge the message, removing it from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgementFailed`] if the broker rejects the ack.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Reject the message. With `requeue` it goes back to the queue,
    /// otherwise the broker drops it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgementFailed`] if the broker rejects the nack.
    pub async fn reject(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }

    /// Size of the body in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("size_bytes", &self.payload.len())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a subscription.
///
/// The stream ends when the underlying connection or channel closes.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Trait for broker implementations.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
/// broker can be shared as `Arc<dyn MessageBroker>` between the publisher and
/// the consumer loop.
pub trait MessageBroker: Send + Sync {
    /// Publish a message to the configured exchange.
    ///
    /// Resolves only once the broker has taken responsibility for the message.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker refuses the message
    /// or [`BrokerError::PublishTimeout`] if it does not answer in time.
    fn publish(
        &self,
        routing_key: &str,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Start consuming from `queue` with manual acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the consumer cannot be
    /// registered.
    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>>;
}
