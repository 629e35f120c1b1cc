//! `OrderPublisher` against the in-memory broker.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::panic)]

use order_pipeline_core::broker::BrokerError;
use order_pipeline_core::codec::{self, CONTENT_TYPE};
use order_pipeline_core::environment::Clock;
use order_pipeline_core::order::OrderItem;
use order_pipeline_core::publisher::{OrderPublisher, PublishError};
use order_pipeline_core::validation::OrderValidator;
use order_pipeline_testing::{InMemoryBroker, sample_order, test_clock};
use std::sync::Arc;

fn publisher(broker: &InMemoryBroker) -> OrderPublisher {
    OrderPublisher::new(
        Arc::new(broker.clone()),
        "orders",
        OrderValidator::new(),
        Arc::new(test_clock()),
    )
}

#[tokio::test]
async fn test_publish_routes_by_queue_name() {
    let broker = InMemoryBroker::new();
    broker.declare_queue("orders");

    publisher(&broker)
        .publish(&sample_order(1))
        .await
        .expect("publish should succeed");

    let published = broker.published("orders");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].content_type, CONTENT_TYPE);
    assert_eq!(published[0].timestamp, test_clock().now());
    assert_eq!(
        codec::decode(&published[0].payload).expect("payload decodes"),
        sample_order(1)
    );
}

#[tokio::test]
async fn test_invalid_order_never_reaches_broker() {
    let broker = InMemoryBroker::new();
    broker.declare_queue("orders");

    let mut order = sample_order(2);
    order.items.clear();

    let err = publisher(&broker)
        .publish(&order)
        .await
        .expect_err("empty order must be refused");
    match err {
        PublishError::Invalid(violations) => assert!(violations.has_field("items")),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(broker.published("orders").is_empty());
    assert_eq!(broker.queue_len("orders"), 0);
}

#[tokio::test]
async fn test_non_finite_price_is_refused_before_encoding() {
    let broker = InMemoryBroker::new();
    broker.declare_queue("orders");

    let mut order = sample_order(3);
    order.items.push(OrderItem::new("void", 1, f64::NAN));

    assert!(matches!(
        publisher(&broker).publish(&order).await,
        Err(PublishError::Invalid(_))
    ));
    assert!(broker.published("orders").is_empty());
}

#[tokio::test]
async fn test_broker_refusal_is_reported() {
    let broker = InMemoryBroker::new();

    let err = publisher(&broker)
        .publish(&sample_order(4))
        .await
        .expect_err("unroutable publish must fail");
    assert!(matches!(
        err,
        PublishError::Broker(BrokerError::PublishFailed { .. })
    ));
}

#[tokio::test]
async fn test_publisher_does_not_retry() {
    let broker = InMemoryBroker::new();
    broker.declare_queue("orders");
    broker.fail_next_publishes(1);

    assert!(publisher(&broker).publish(&sample_order(5)).await.is_err());
    assert_eq!(broker.queue_len("orders"), 0);
}
