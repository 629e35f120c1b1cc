//! Integration tests for [`AmqpBroker`] against a real RabbitMQ instance.
//!
//! These tests use testcontainers to start RabbitMQ and validate:
//! - Idempotent topology declaration
//! - Publish/consume round-trip with persistent JSON messages
//! - Requeue on reject and redelivery flag
//! - Dead-letter routing with headers
//! - Unroutable publishes are reported as errors
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take several seconds to
//! start the broker:
//! ```bash
//! cargo test -p order-pipeline-amqp --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chrono::Utc;
use futures::StreamExt;
use order_pipeline_amqp::{AmqpBroker, Topology};
use order_pipeline_core::broker::{
    ATTEMPTS_HEADER, BrokerError, Delivery, DeliveryStream, LAST_ERROR_HEADER, MessageBroker,
    OutboundMessage, dead_letter_queue,
};
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::rabbitmq::RabbitMq;

const EXCHANGE: &str = "orders_exchange";
const QUEUE: &str = "orders";

async fn start_rabbitmq() -> (ContainerAsync<RabbitMq>, String) {
    let node = RabbitMq::default()
        .start()
        .await
        .expect("Failed to start RabbitMQ container");
    let host = node.get_host().await.expect("Failed to get host");
    let port = node
        .get_host_port_ipv4(5672)
        .await
        .expect("Failed to get port");
    (node, format!("amqp://guest:guest@{host}:{port}/%2f"))
}

/// The container reports ready before the AMQP listener always accepts
/// connections, so retry for a while.
async fn connect(url: &str) -> AmqpBroker {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        match AmqpBroker::builder()
            .url(url)
            .exchange(EXCHANGE)
            .publish_timeout(Duration::from_secs(5))
            .connect()
            .await
        {
            Ok(broker) => return broker,
            Err(e) => {
                assert!(
                    attempt != max_attempts,
                    "RabbitMQ failed to become ready after {max_attempts} attempts: {e}"
                );
                tokio::time::sleep(Duration::from_millis(500)).await;
            },
        }
    }
    unreachable!("loop either returns or panics")
}

fn json_message(body: &str) -> OutboundMessage {
    OutboundMessage::new(body.as_bytes().to_vec(), "application/json", Utc::now())
}

async fn next_delivery(stream: &mut DeliveryStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("Timeout waiting for delivery")
        .expect("Stream ended")
        .expect("Delivery error")
}

#[tokio::test]
#[ignore]
async fn test_topology_declaration_is_idempotent() {
    let (_node, url) = start_rabbitmq().await;
    let broker = connect(&url).await;
    let topology = Topology::new(EXCHANGE, QUEUE).with_dead_letter(true);

    broker
        .declare_topology(&topology)
        .await
        .expect("First declaration failed");
    broker
        .declare_topology(&topology)
        .await
        .expect("Second declaration failed");

    broker.close().await;

    // A fresh process declaring the same topology must also succeed.
    let broker = connect(&url).await;
    broker
        .declare_topology(&topology)
        .await
        .expect("Declaration from new connection failed");
    broker.close().await;
}

#[tokio::test]
#[ignore]
async fn test_publish_and_consume_round_trip() {
    let (_node, url) = start_rabbitmq().await;
    let broker = connect(&url).await;
    broker
        .declare_topology(&Topology::new(EXCHANGE, QUEUE))
        .await
        .expect("Failed to declare topology");

    let mut stream = broker.subscribe(QUEUE).await.expect("Failed to subscribe");

    broker
        .publish(QUEUE, &json_message(r#"{"orderCode":1}"#))
        .await
        .expect("Failed to publish first message");
    broker
        .publish(QUEUE, &json_message(r#"{"orderCode":2}"#))
        .await
        .expect("Failed to publish second message");

    let first = next_delivery(&mut stream).await;
    assert_eq!(first.payload, br#"{"orderCode":1}"#);
    assert!(!first.redelivered);
    first.ack().await.expect("Failed to ack first delivery");

    let second = next_delivery(&mut stream).await;
    assert_eq!(second.payload, br#"{"orderCode":2}"#);
    second.ack().await.expect("Failed to ack second delivery");

    broker.close().await;
}

#[tokio::test]
#[ignore]
async fn test_reject_with_requeue_redelivers() {
    let (_node, url) = start_rabbitmq().await;
    let broker = connect(&url).await;
    broker
        .declare_topology(&Topology::new(EXCHANGE, QUEUE))
        .await
        .expect("Failed to declare topology");

    let mut stream = broker.subscribe(QUEUE).await.expect("Failed to subscribe");
    broker
        .publish(QUEUE, &json_message(r#"{"orderCode":3}"#))
        .await
        .expect("Failed to publish");

    let delivery = next_delivery(&mut stream).await;
    delivery.reject(true).await.expect("Failed to reject");

    let redelivered = next_delivery(&mut stream).await;
    assert!(redelivered.redelivered);
    assert_eq!(redelivered.payload, br#"{"orderCode":3}"#);
    redelivered.ack().await.expect("Failed to ack");

    broker.close().await;
}

#[tokio::test]
#[ignore]
async fn test_dead_letter_route_carries_headers() {
    let (_node, url) = start_rabbitmq().await;
    let broker = connect(&url).await;
    broker
        .declare_topology(&Topology::new(EXCHANGE, QUEUE).with_dead_letter(true))
        .await
        .expect("Failed to declare topology");

    let dead_letter = dead_letter_queue(QUEUE);
    let mut stream = broker
        .subscribe(&dead_letter)
        .await
        .expect("Failed to subscribe to dead-letter queue");

    let message = json_message(r#"{"orderCode":4}"#)
        .with_header(ATTEMPTS_HEADER, "5")
        .with_header(LAST_ERROR_HEADER, "Database error: pool timed out");
    broker
        .publish(&dead_letter, &message)
        .await
        .expect("Failed to publish to dead-letter queue");

    let delivery = next_delivery(&mut stream).await;
    assert_eq!(delivery.headers.get(ATTEMPTS_HEADER).map(String::as_str), Some("5"));
    assert_eq!(
        delivery.headers.get(LAST_ERROR_HEADER).map(String::as_str),
        Some("Database error: pool timed out")
    );
    delivery.ack().await.expect("Failed to ack");

    broker.close().await;
}

#[tokio::test]
#[ignore]
async fn test_unroutable_publish_is_an_error() {
    let (_node, url) = start_rabbitmq().await;
    let broker = connect(&url).await;
    broker
        .declare_topology(&Topology::new(EXCHANGE, QUEUE))
        .await
        .expect("Failed to declare topology");

    let result = broker
        .publish("no-such-queue", &json_message("{}"))
        .await;

    match result {
        Err(BrokerError::PublishFailed { routing_key, reason }) => {
            assert_eq!(routing_key, "no-such-queue");
            assert!(reason.contains("unroutable"), "unexpected reason: {reason}");
        },
        other => panic!("Expected PublishFailed, got {other:?}"),
    }

    broker.close().await;
}
