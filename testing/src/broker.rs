//! In-memory message broker.
//!
//! Mirrors the parts of the AMQP broker the consumer relies on:
//! - publishing to an undeclared queue fails as unroutable
//! - one unsettled delivery per subscription (prefetch 1)
//! - requeued messages go back to the head of the queue, marked redelivered
//! - a delivery dropped without being settled is requeued
//! - [`InMemoryBroker::close_subscriptions`] ends every open stream, like a
//!   lost connection

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use order_pipeline_core::broker::{
    Acknowledger, BrokerError, Delivery, DeliveryStream, MessageBroker, MessageHeaders,
    OutboundMessage,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// A message as held by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Encoded body.
    pub payload: Vec<u8>,
    /// Application headers.
    pub headers: MessageHeaders,
    /// Whether the message has been delivered before.
    pub redelivered: bool,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    acked: Vec<StoredMessage>,
    discarded: Vec<StoredMessage>,
    requeued: usize,
    published: Vec<(String, OutboundMessage)>,
    failing_publishes: usize,
    next_tag: u64,
    generation: u64,
}

enum Next {
    Message(u64, StoredMessage),
    Empty,
    Closed,
}

/// In-memory [`MessageBroker`] for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use order_pipeline_testing::InMemoryBroker;
/// use order_pipeline_core::broker::{MessageBroker, OutboundMessage};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// broker.declare_queue("orders");
///
/// let message = OutboundMessage::new(b"{}".to_vec(), "application/json", Utc::now());
/// broker.publish("orders", &message).await?;
/// assert_eq!(broker.queue_len("orders"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    /// Create a broker with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a queue. Declaring an existing queue keeps its messages.
    pub fn declare_queue(&self, queue: &str) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_string())
            .or_default();
    }

    /// Put raw bytes on a queue, bypassing publish bookkeeping.
    ///
    /// Useful for malformed payloads no publisher would produce.
    pub fn enqueue_raw(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                payload: payload.into(),
                headers: MessageHeaders::new(),
                redelivered: false,
            });
        self.notify.notify_waiters();
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().unwrap().failing_publishes = count;
    }

    /// End every open subscription stream.
    pub fn close_subscriptions(&self) {
        self.state.lock().unwrap().generation += 1;
        self.notify.notify_waiters();
    }

    /// Messages waiting on `queue`.
    #[must_use]
    pub fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Snapshot of the messages waiting on `queue`, head first.
    #[must_use]
    pub fn messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages acknowledged so far.
    #[must_use]
    pub fn acked(&self) -> Vec<StoredMessage> {
        self.state.lock().unwrap().acked.clone()
    }

    /// Messages rejected without requeue so far.
    #[must_use]
    pub fn discarded(&self) -> Vec<StoredMessage> {
        self.state.lock().unwrap().discarded.clone()
    }

    /// Number of requeues so far.
    #[must_use]
    pub fn requeued_count(&self) -> usize {
        self.state.lock().unwrap().requeued
    }

    /// Messages successfully published to `routing_key`.
    #[must_use]
    pub fn published(&self, routing_key: &str) -> Vec<OutboundMessage> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn take_next(&self, queue: &str, generation: u64) -> Next {
        let mut state = self.state.lock().unwrap();
        if state.generation != generation {
            return Next::Closed;
        }
        let Some(message) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Next::Empty;
        };
        state.next_tag += 1;
        Next::Message(state.next_tag, message)
    }
}

impl MessageBroker for InMemoryBroker {
    fn publish(
        &self,
        routing_key: &str,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                Err(BrokerError::PublishFailed {
                    routing_key: routing_key.to_string(),
                    reason: "injected failure".to_string(),
                })
            } else if let Some(queue) = state.queues.get_mut(routing_key) {
                queue.push_back(StoredMessage {
                    payload: message.payload.clone(),
                    headers: message.headers.clone(),
                    redelivered: false,
                });
                state.published.push((routing_key.to_string(), message.clone()));
                Ok(())
            } else {
                Err(BrokerError::PublishFailed {
                    routing_key: routing_key.to_string(),
                    reason: "message unroutable: no queue bound".to_string(),
                })
            }
        };
        if result.is_ok() {
            self.notify.notify_waiters();
        }
        Box::pin(async move { result })
    }

    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let queue = queue.to_string();
        Box::pin(async move {
            let generation = {
                let state = self.state.lock().unwrap();
                if !state.queues.contains_key(&queue) {
                    return Err(BrokerError::SubscriptionFailed {
                        queue,
                        reason: "queue not declared".to_string(),
                    });
                }
                state.generation
            };

            let broker = self.clone();
            let prefetch = Arc::new(Semaphore::new(1));

            let stream: DeliveryStream = Box::pin(async_stream::stream! {
                loop {
                    let Ok(permit) = Arc::clone(&prefetch).acquire_owned().await else {
                        break;
                    };

                    let next = loop {
                        let notified = broker.notify.notified();
                        tokio::pin!(notified);
                        notified.as_mut().enable();

                        match broker.take_next(&queue, generation) {
                            Next::Empty => notified.await,
                            other => break other,
                        }
                    };

                    let Next::Message(delivery_tag, message) = next else {
                        break;
                    };

                    let acker = InMemoryAcker {
                        broker: broker.clone(),
                        queue: queue.clone(),
                        message: Mutex::new(Some(message.clone())),
                        _permit: permit,
                    };
                    yield Ok(Delivery::new(
                        delivery_tag,
                        message.redelivered,
                        message.payload,
                        message.headers,
                        Box::new(acker),
                    ));
                }
            });
            Ok(stream)
        })
    }
}

struct InMemoryAcker {
    broker: InMemoryBroker,
    queue: String,
    message: Mutex<Option<StoredMessage>>,
    _permit: OwnedSemaphorePermit,
}

impl InMemoryAcker {
    fn settle(&self, ack: bool, requeue: bool) {
        let Some(mut message) = self.message.lock().unwrap().take() else {
            return;
        };
        let mut state = self.broker.state.lock().unwrap();
        if ack {
            state.acked.push(message);
        } else if requeue {
            message.redelivered = true;
            state.requeued += 1;
            state
                .queues
                .entry(self.queue.clone())
                .or_default()
                .push_front(message);
            drop(state);
            self.broker.notify.notify_waiters();
        } else {
            state.discarded.push(message);
        }
    }
}

impl Acknowledger for InMemoryAcker {
    fn ack(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        self.settle(true, false);
        Box::pin(async { Ok(()) })
    }

    fn reject(
        &self,
        requeue: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        self.settle(false, requeue);
        Box::pin(async { Ok(()) })
    }
}

impl Drop for InMemoryAcker {
    fn drop(&mut self) {
        self.settle(false, true);
    }
}
