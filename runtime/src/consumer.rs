//! Order consumer loop with manual acknowledgement and reconnection.
//!
//! # Per-delivery state machine
//!
//! ```text
//! received ──decode──► processed ──► ack                 (persisted or duplicate)
//!    │                    │
//!    │ malformed          ├── permanent error ──► reject, no requeue
//!    ▼                    │
//! reject, no requeue      └── transient error ──► backoff ──► reject, requeue
//!                                                   │
//!                                                   └─ attempts exhausted ──► dead-letter, ack
//! ```
//!
//! # Subscribe-process-reconnect loop
//!
//! ```text
//! loop {
//!     subscribe(queue)
//!     while let Some(delivery) = stream.next() { handle one delivery }
//!     stream ended: wait retry_delay, resubscribe
//! }
//! ```
//!
//! Deliveries are handled strictly one at a time. A shutdown signal stops
//! the loop between deliveries; a delivery already being processed runs to
//! completion and is settled first.

use crate::processor::{OrderProcessor, ProcessError};
use crate::retry::RedeliveryPolicy;
use futures::StreamExt;
use order_pipeline_core::Utc;
use order_pipeline_core::broker::{
    ATTEMPTS_HEADER, BrokerError, Delivery, DeliveryStream, LAST_ERROR_HEADER, MessageBroker,
    OutboundMessage, dead_letter_queue,
};
use order_pipeline_core::codec;
use order_pipeline_core::order::{OrderCode, OrderRecord};
use order_pipeline_core::store::PersistOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Default wait before resubscribing after the delivery stream ends.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default number of order codes whose failed attempts are remembered.
pub const DEFAULT_ATTEMPT_CAPACITY: usize = 10_000;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Persisted and acked.
    Acked,
    /// Already persisted earlier; acked without writing.
    Duplicate,
    /// Returned to the queue after a transient failure.
    Requeued {
        /// Failed attempts so far for this order code.
        attempts: u32,
    },
    /// Rejected without requeue (malformed or permanently invalid).
    Discarded,
    /// Published to the dead-letter queue, original acked.
    DeadLettered {
        /// Failed attempts that triggered dead-lettering.
        attempts: u32,
    },
}

enum StreamExit {
    Ended,
    Shutdown,
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn log_settle_error(result: Result<(), BrokerError>, delivery_tag: u64, action: &str) {
    if let Err(e) = result {
        warn!(delivery_tag, action, error = %e, "Failed to settle delivery");
    }
}

/// Consumes orders from one queue and feeds them to an [`OrderProcessor`].
///
/// # Example
///
/// ```rust,ignore
/// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
///
/// let consumer = OrderConsumer::new("orders", broker, processor, shutdown_rx)
///     .with_redelivery_policy(RedeliveryPolicy::dead_letter_after(5))
///     .with_retry_delay(Duration::from_secs(5));
///
/// let handle = consumer.spawn();
/// shutdown_tx.send(true)?;
/// handle.await?;
/// ```
pub struct OrderConsumer {
    queue: String,
    broker: Arc<dyn MessageBroker>,
    processor: OrderProcessor,
    policy: RedeliveryPolicy,
    shutdown: watch::Receiver<bool>,
    retry_delay: Duration,
    /// Failed attempts per order code, reset on success or dead-lettering.
    ///
    /// An order requeued here may be settled by another consumer and never
    /// come back, so the map is capped at `attempt_capacity` and the entry
    /// that failed longest ago is evicted first.
    attempts: HashMap<OrderCode, FailedAttempts>,
    attempt_capacity: usize,
    failure_seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct FailedAttempts {
    count: u32,
    last_failure: u64,
}

impl OrderConsumer {
    /// Create a consumer with an unbounded redelivery policy and the default
    /// retry delay.
    #[must_use]
    pub fn new(
        queue: impl Into<String>,
        broker: Arc<dyn MessageBroker>,
        processor: OrderProcessor,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            processor,
            policy: RedeliveryPolicy::unbounded(),
            shutdown,
            retry_delay: DEFAULT_RETRY_DELAY,
            attempts: HashMap::new(),
            attempt_capacity: DEFAULT_ATTEMPT_CAPACITY,
            failure_seq: 0,
        }
    }

    /// Set the redelivery policy.
    #[must_use]
    pub fn with_redelivery_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the wait before resubscribing (default: 5 seconds).
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Cap the number of order codes whose attempts are remembered
    /// (default: [`DEFAULT_ATTEMPT_CAPACITY`], minimum 1).
    #[must_use]
    pub fn with_attempt_capacity(mut self, capacity: usize) -> Self {
        self.attempt_capacity = capacity.max(1);
        self
    }

    /// Number of order codes with remembered failed attempts.
    #[must_use]
    pub fn tracked_orders(&self) -> usize {
        self.attempts.len()
    }

    /// Queue this consumer reads from.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task ends when the shutdown signal fires.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the subscribe-process-reconnect loop until shutdown.
    pub async fn run(mut self) {
        info!(queue = %self.queue, policy = ?self.policy, "Order consumer started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let subscribed = tokio::select! {
                biased;
                () = wait_for_shutdown(&mut self.shutdown) => break,
                result = self.broker.subscribe(&self.queue) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(queue = %self.queue, "Subscribed to queue");
                    if let StreamExit::Shutdown = self.consume(&mut stream).await {
                        break;
                    }
                    warn!(
                        queue = %self.queue,
                        retry_delay_ms = millis(self.retry_delay),
                        "Delivery stream ended, reconnecting"
                    );
                },
                Err(e) => {
                    error!(
                        queue = %self.queue,
                        error = %e,
                        retry_delay_ms = millis(self.retry_delay),
                        "Failed to subscribe, retrying"
                    );
                },
            }

            tokio::select! {
                biased;
                () = wait_for_shutdown(&mut self.shutdown) => break,
                () = tokio::time::sleep(self.retry_delay) => {},
            }
        }

        info!(queue = %self.queue, "Order consumer stopped");
    }

    async fn consume(&mut self, stream: &mut DeliveryStream) -> StreamExit {
        loop {
            let next = tokio::select! {
                biased;
                () = wait_for_shutdown(&mut self.shutdown) => {
                    info!(queue = %self.queue, "Shutdown requested, no longer pulling deliveries");
                    return StreamExit::Shutdown;
                },
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.handle_delivery(delivery).await;
                },
                Some(Err(e)) => {
                    warn!(queue = %self.queue, error = %e, "Error receiving delivery");
                },
                None => return StreamExit::Ended,
            }
        }
    }

    /// Decode, process, and settle one delivery.
    pub async fn handle_delivery(&mut self, delivery: Delivery) -> Disposition {
        let start = Instant::now();
        let delivery_tag = delivery.delivery_tag;
        let size_bytes = delivery.size_bytes();

        let order = match codec::decode(&delivery.payload) {
            Ok(order) => order,
            Err(e) => {
                error!(
                    delivery_tag,
                    size_bytes,
                    error = %e,
                    payload = %codec::payload_for_log(&delivery.payload),
                    "Discarding malformed message"
                );
                log_settle_error(delivery.reject(false).await, delivery_tag, "reject");
                metrics::counter!("orders.discarded").increment(1);
                return Disposition::Discarded;
            },
        };

        let disposition = match self.processor.process(&order).await {
            Ok(outcome) => {
                self.attempts.remove(&order.order_code);
                log_settle_error(delivery.ack().await, delivery_tag, "ack");
                match outcome {
                    PersistOutcome::Inserted { .. } => Disposition::Acked,
                    PersistOutcome::Duplicate { .. } => Disposition::Duplicate,
                }
            },
            Err(e) if e.is_permanent() => {
                self.attempts.remove(&order.order_code);
                error!(
                    delivery_tag,
                    order_code = %order.order_code,
                    error = %e,
                    "Discarding order that can never be persisted"
                );
                log_settle_error(delivery.reject(false).await, delivery_tag, "reject");
                metrics::counter!("orders.discarded").increment(1);
                Disposition::Discarded
            },
            Err(e) => self.handle_transient_failure(delivery, &order, &e).await,
        };

        info!(
            delivery_tag,
            order_code = %order.order_code,
            size_bytes,
            duration_ms = millis(start.elapsed()),
            disposition = ?disposition,
            "Delivery handled"
        );
        disposition
    }

    async fn handle_transient_failure(
        &mut self,
        delivery: Delivery,
        order: &OrderRecord,
        error: &ProcessError,
    ) -> Disposition {
        let delivery_tag = delivery.delivery_tag;
        let attempts = self.record_failure(order.order_code);

        if self.policy.should_dead_letter(attempts) {
            return self.dead_letter(delivery, order, error, attempts).await;
        }

        let delay = self.policy.delay_for_attempt(attempts);
        warn!(
            delivery_tag,
            order_code = %order.order_code,
            attempts,
            delay_ms = millis(delay),
            error = %error,
            "Processing failed, requeueing after backoff"
        );

        tokio::select! {
            biased;
            () = wait_for_shutdown(&mut self.shutdown) => {
                debug!(delivery_tag, "Backoff interrupted by shutdown");
            },
            () = tokio::time::sleep(delay) => {},
        }

        log_settle_error(delivery.reject(true).await, delivery_tag, "requeue");
        metrics::counter!("orders.requeued").increment(1);
        Disposition::Requeued { attempts }
    }

    fn record_failure(&mut self, code: OrderCode) -> u32 {
        if !self.attempts.contains_key(&code) && self.attempts.len() >= self.attempt_capacity {
            let oldest = self
                .attempts
                .iter()
                .min_by_key(|(_, entry)| entry.last_failure)
                .map(|(code, _)| *code);
            if let Some(oldest) = oldest {
                self.attempts.remove(&oldest);
                debug!(order_code = %oldest, "Forgot failed attempts of least recent order");
            }
        }

        self.failure_seq += 1;
        let entry = self.attempts.entry(code).or_insert(FailedAttempts {
            count: 0,
            last_failure: 0,
        });
        entry.count = entry.count.saturating_add(1);
        entry.last_failure = self.failure_seq;
        entry.count
    }

    async fn dead_letter(
        &mut self,
        delivery: Delivery,
        order: &OrderRecord,
        error: &ProcessError,
        attempts: u32,
    ) -> Disposition {
        let delivery_tag = delivery.delivery_tag;
        let routing_key = dead_letter_queue(&self.queue);

        let mut message =
            OutboundMessage::new(delivery.payload.clone(), codec::CONTENT_TYPE, Utc::now());
        message.headers.clone_from(&delivery.headers);
        let message = message
            .with_header(ATTEMPTS_HEADER, attempts.to_string())
            .with_header(LAST_ERROR_HEADER, error.to_string());

        match self.broker.publish(&routing_key, &message).await {
            Ok(()) => {
                self.attempts.remove(&order.order_code);
                log_settle_error(delivery.ack().await, delivery_tag, "ack");
                metrics::counter!("orders.dead_lettered").increment(1);
                warn!(
                    delivery_tag,
                    order_code = %order.order_code,
                    attempts,
                    routing_key = %routing_key,
                    error = %error,
                    "Order moved to dead-letter queue"
                );
                Disposition::DeadLettered { attempts }
            },
            Err(e) => {
                error!(
                    delivery_tag,
                    order_code = %order.order_code,
                    routing_key = %routing_key,
                    error = %e,
                    "Dead-letter publish failed, requeueing original"
                );
                log_settle_error(delivery.reject(true).await, delivery_tag, "requeue");
                metrics::counter!("orders.requeued").increment(1);
                Disposition::Requeued { attempts }
            },
        }
    }
}

impl std::fmt::Debug for OrderConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderConsumer")
            .field("queue", &self.queue)
            .field("policy", &self.policy)
            .field("retry_delay", &self.retry_delay)
            .field("tracked_orders", &self.attempts.len())
            .finish_non_exhaustive()
    }
}
