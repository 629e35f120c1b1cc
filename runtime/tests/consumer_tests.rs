//! Consumer loop tests against the in-memory broker and store.
//!
//! Each test runs a real `OrderConsumer` task and observes how deliveries
//! are settled.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use futures::StreamExt;
use order_pipeline_core::broker::{ATTEMPTS_HEADER, LAST_ERROR_HEADER, MessageBroker};
use order_pipeline_core::order::{OrderCode, OrderItem};
use order_pipeline_core::store::StoreError;
use order_pipeline_core::validation::OrderValidator;
use order_pipeline_runtime::{Disposition, OrderConsumer, OrderProcessor, RedeliveryPolicy};
use order_pipeline_testing::{InMemoryBroker, InMemoryOrderStore, encoded, eventually, sample_order};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const QUEUE: &str = "orders";
const DEAD_LETTER: &str = "orders.dead-letter";

struct Harness {
    broker: InMemoryBroker,
    store: InMemoryOrderStore,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(policy: RedeliveryPolicy) -> Self {
        let broker = InMemoryBroker::new();
        broker.declare_queue(QUEUE);
        broker.declare_queue(DEAD_LETTER);
        let store = InMemoryOrderStore::new();
        Self::start_with(broker, store, policy)
    }

    fn start_with(broker: InMemoryBroker, store: InMemoryOrderStore, policy: RedeliveryPolicy) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let processor = OrderProcessor::new(Arc::new(store.clone()), OrderValidator::new());
        let handle = OrderConsumer::new(QUEUE, Arc::new(broker.clone()), processor, shutdown_rx)
            .with_redelivery_policy(policy)
            .with_retry_delay(Duration::from_millis(10))
            .spawn();

        Self {
            broker,
            store,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).expect("consumer should be running");
        tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("consumer should stop promptly")
            .expect("consumer task should not panic");
    }
}

fn fast_policy(max_attempts: u32) -> RedeliveryPolicy {
    RedeliveryPolicy::builder()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build()
}

fn transient() -> StoreError {
    StoreError::DatabaseError("connection reset".to_string())
}

#[tokio::test]
async fn test_valid_order_is_persisted_and_acked() {
    let h = Harness::start(fast_policy(0));
    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(1)));

    assert!(eventually(|| h.broker.acked().len() == 1).await);
    assert_eq!(h.store.order(OrderCode::new(1)), Some(sample_order(1)));
    assert_eq!(h.store.item_count(), 2);
    assert_eq!(h.broker.queue_len(QUEUE), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_malformed_message_is_discarded_without_processing() {
    let h = Harness::start(fast_policy(0));
    h.broker.enqueue_raw(QUEUE, b"{\"orderCode\": \"not a number\"".to_vec());

    assert!(eventually(|| h.broker.discarded().len() == 1).await);
    assert_eq!(h.store.persist_calls(), 0);
    assert!(h.broker.acked().is_empty());
    assert_eq!(h.broker.queue_len(QUEUE), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_invalid_order_is_discarded_without_writing() {
    let h = Harness::start(fast_policy(0));
    let mut order = sample_order(2);
    order.items.push(OrderItem::new("ghost", 0, 1.00));
    h.broker.enqueue_raw(QUEUE, encoded(&order));

    assert!(eventually(|| h.broker.discarded().len() == 1).await);
    assert_eq!(h.store.persist_calls(), 0);
    assert!(h.store.is_empty());

    h.stop().await;
}

#[tokio::test]
async fn test_unrepresentable_price_is_discarded() {
    let h = Harness::start(fast_policy(0));
    let mut order = sample_order(3);
    order.items.push(OrderItem::new("yacht", 1, 1e12));
    h.broker.enqueue_raw(QUEUE, encoded(&order));

    assert!(eventually(|| h.broker.discarded().len() == 1).await);
    assert_eq!(h.store.persist_calls(), 1);
    assert!(h.store.is_empty());
    assert_eq!(h.broker.requeued_count(), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_sub_cent_price_is_discarded_not_retried() {
    let h = Harness::start(fast_policy(0));
    let mut order = sample_order(4);
    order.items.push(OrderItem::new("dust", 1, 0.001));
    h.broker.enqueue_raw(QUEUE, encoded(&order));

    assert!(eventually(|| h.broker.discarded().len() == 1).await);
    assert_eq!(h.store.persist_calls(), 0);
    assert!(h.store.is_empty());
    assert_eq!(h.broker.requeued_count(), 0);
    assert!(h.broker.published(DEAD_LETTER).is_empty());

    h.stop().await;
}

#[tokio::test]
async fn test_transient_failure_is_requeued_until_it_succeeds() {
    let broker = InMemoryBroker::new();
    broker.declare_queue(QUEUE);
    let store = InMemoryOrderStore::new();
    store.fail_next(2, transient());
    let h = Harness::start_with(broker, store, fast_policy(0));

    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(4)));

    assert!(eventually(|| h.broker.acked().len() == 1).await);
    assert_eq!(h.broker.requeued_count(), 2);
    assert_eq!(h.store.persist_calls(), 3);
    assert_eq!(h.store.len(), 1);
    assert!(h.broker.acked()[0].redelivered);

    h.stop().await;
}

#[tokio::test]
async fn test_exhausted_attempts_go_to_dead_letter_queue() {
    let h = Harness::start(fast_policy(3));
    h.store.fail_next(10, transient());
    let payload = encoded(&sample_order(5));
    h.broker.enqueue_raw(QUEUE, payload.clone());

    assert!(eventually(|| h.broker.published(DEAD_LETTER).len() == 1).await);
    assert!(eventually(|| h.broker.acked().len() == 1).await);

    let dead = &h.broker.published(DEAD_LETTER)[0];
    assert_eq!(dead.payload, payload);
    assert_eq!(dead.headers.get(ATTEMPTS_HEADER).map(String::as_str), Some("3"));
    assert!(
        dead.headers
            .get(LAST_ERROR_HEADER)
            .is_some_and(|e| e.contains("connection reset"))
    );
    assert_eq!(h.broker.requeued_count(), 2);
    assert_eq!(h.store.persist_calls(), 3);
    assert!(h.store.is_empty());
    assert_eq!(h.broker.queue_len(QUEUE), 0);
    assert_eq!(h.broker.queue_len(DEAD_LETTER), 1);

    h.stop().await;
}

#[tokio::test]
async fn test_failed_dead_letter_publish_requeues_original() {
    let h = Harness::start(fast_policy(1));
    h.store.fail_next(10, transient());
    h.broker.fail_next_publishes(1);
    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(6)));

    assert!(eventually(|| h.broker.published(DEAD_LETTER).len() == 1).await);

    let dead = &h.broker.published(DEAD_LETTER)[0];
    assert_eq!(dead.headers.get(ATTEMPTS_HEADER).map(String::as_str), Some("2"));
    assert_eq!(h.broker.requeued_count(), 1);

    h.stop().await;
}

#[tokio::test]
async fn test_duplicate_order_is_acked_without_second_write() {
    let h = Harness::start(fast_policy(0));
    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(7)));
    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(7)));

    assert!(eventually(|| h.broker.acked().len() == 2).await);
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.store.item_count(), 2);
    assert!(h.broker.discarded().is_empty());

    h.stop().await;
}

#[tokio::test]
async fn test_orders_are_processed_in_queue_order() {
    let h = Harness::start(fast_policy(0));
    for code in 10..15 {
        h.broker.enqueue_raw(QUEUE, encoded(&sample_order(code)));
    }

    assert!(eventually(|| h.broker.acked().len() == 5).await);
    let acked: Vec<_> = h
        .broker
        .acked()
        .iter()
        .map(|m| {
            order_pipeline_core::codec::decode(&m.payload)
                .expect("acked payload decodes")
                .order_code
                .value()
        })
        .collect();
    assert_eq!(acked, vec![10, 11, 12, 13, 14]);

    h.stop().await;
}

#[tokio::test]
async fn test_consumer_resubscribes_after_stream_ends() {
    let h = Harness::start(fast_policy(0));
    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(20)));
    assert!(eventually(|| h.broker.acked().len() == 1).await);

    h.broker.close_subscriptions();
    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(21)));

    assert!(eventually(|| h.broker.acked().len() == 2).await);
    assert_eq!(h.store.len(), 2);

    h.stop().await;
}

#[tokio::test]
async fn test_consumer_retries_subscription_until_queue_exists() {
    let broker = InMemoryBroker::new();
    let h = Harness::start_with(broker, InMemoryOrderStore::new(), fast_policy(0));

    tokio::time::sleep(Duration::from_millis(30)).await;
    h.broker.declare_queue(QUEUE);
    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(30)));

    assert!(eventually(|| h.store.len() == 1).await);

    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_while_idle_is_prompt() {
    let h = Harness::start(fast_policy(0));
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff_and_requeues() {
    let policy = RedeliveryPolicy::builder()
        .initial_delay(Duration::from_secs(60))
        .max_delay(Duration::from_secs(60))
        .build();
    let h = Harness::start(policy);
    h.store.fail_next(1, transient());
    h.broker.enqueue_raw(QUEUE, encoded(&sample_order(40)));

    assert!(eventually(|| h.store.persist_calls() == 1).await);

    let broker = h.broker.clone();
    h.stop().await;

    assert_eq!(broker.requeued_count(), 1);
    assert_eq!(broker.queue_len(QUEUE), 1);
    assert!(broker.messages(QUEUE)[0].redelivered);
}

async fn handle_next(broker: &InMemoryBroker, consumer: &mut OrderConsumer, queue: &str) -> Disposition {
    let mut stream = broker.subscribe(queue).await.expect("queue should exist");
    let delivery = stream
        .next()
        .await
        .expect("delivery expected")
        .expect("delivery should be readable");
    consumer.handle_delivery(delivery).await
}

#[tokio::test]
async fn test_attempt_counts_are_bounded_and_forget_least_recent_order() {
    let broker = InMemoryBroker::new();
    let store = InMemoryOrderStore::new();
    store.fail_next(4, transient());

    // One queue per order so each requeued delivery stays put.
    let queues = ["q1", "q2", "q3"];
    for (code, queue) in (1..).zip(queues) {
        broker.declare_queue(queue);
        broker.enqueue_raw(queue, encoded(&sample_order(code)));
    }

    let (_shutdown, shutdown_rx) = watch::channel(false);
    let processor = OrderProcessor::new(Arc::new(store.clone()), OrderValidator::new());
    let mut consumer = OrderConsumer::new(QUEUE, Arc::new(broker.clone()), processor, shutdown_rx)
        .with_redelivery_policy(fast_policy(0))
        .with_attempt_capacity(2);

    let requeued_once = Disposition::Requeued { attempts: 1 };
    assert_eq!(handle_next(&broker, &mut consumer, "q1").await, requeued_once);
    assert_eq!(handle_next(&broker, &mut consumer, "q2").await, requeued_once);
    assert_eq!(handle_next(&broker, &mut consumer, "q3").await, requeued_once);
    // Order 1 was evicted when order 3 failed, so its count starts over.
    assert_eq!(handle_next(&broker, &mut consumer, "q1").await, requeued_once);
    assert_eq!(handle_next(&broker, &mut consumer, "q3").await, Disposition::Acked);

    assert_eq!(consumer.tracked_orders(), 1);
}
