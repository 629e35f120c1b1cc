//! # Order Pipeline Runtime
//!
//! The consuming side of the order pipeline.
//!
//! ## Core Components
//!
//! - **`OrderProcessor`**: validates an order and persists it with all its items
//!   in one store transaction
//! - **`OrderConsumer`**: subscribe-process-reconnect loop that settles each
//!   delivery with the broker according to the processing outcome
//! - **`RedeliveryPolicy`**: backoff and dead-letter decision for transient
//!   failures
//!
//! ## Example
//!
//! ```ignore
//! use order_pipeline_runtime::{OrderConsumer, OrderProcessor, RedeliveryPolicy};
//!
//! let processor = OrderProcessor::new(store, OrderValidator::new());
//! let consumer = OrderConsumer::new("orders", broker, processor, shutdown_rx)
//!     .with_redelivery_policy(RedeliveryPolicy::dead_letter_after(5));
//!
//! consumer.spawn().await?;
//! ```

/// Consumer loop
pub mod consumer;

/// Validation plus transactional persistence
pub mod processor;

/// Backoff and dead-letter policy
pub mod retry;

pub use consumer::{DEFAULT_ATTEMPT_CAPACITY, DEFAULT_RETRY_DELAY, Disposition, OrderConsumer};
pub use processor::{OrderProcessor, ProcessError};
pub use retry::RedeliveryPolicy;
