//! # Order Pipeline Core
//!
//! Types and traits shared by every part of the order pipeline.
//!
//! An order travels through four stages:
//!
//! ```text
//! front door ──► OrderPublisher ──► MessageBroker ──► consumer loop ──► OrderStore
//!   (build)       (validate,          (durable          (decode,          (one
//!                  encode)             queue)            process, ack)     transaction)
//! ```
//!
//! This crate defines the data ([`order::OrderRecord`]), the checks it must
//! pass ([`validation::OrderValidator`]), its wire format ([`codec`]), and the
//! two seams to the outside world ([`broker::MessageBroker`] and
//! [`store::OrderStore`]). Adapters live in `order-pipeline-amqp` and
//! `order-pipeline-postgres`; the consumer loop lives in
//! `order-pipeline-runtime`.

pub mod broker;
pub mod codec;
pub mod environment;
pub mod money;
pub mod order;
pub mod publisher;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;

pub use broker::{BrokerError, Delivery, DeliveryStream, MessageBroker, OutboundMessage};
pub use order::{CustomerCode, OrderCode, OrderItem, OrderRecord};
pub use publisher::{OrderPublisher, PublishError};
pub use store::{OrderStore, PersistOutcome, StoreError};
pub use validation::{OrderValidator, ValidationError};
