//! Order publisher.
//!
//! Reads one `CreateOrderRequest` JSON document from stdin, stamps it with the
//! current time, and publishes it to the order queue.
//!
//! ```text
//! echo '{"orderCode":1001,"customerCode":1,"items":[{"product":"pen","quantity":10,"price":1.5}]}' \
//!     | order-publish
//! ```

use anyhow::Context;
use order_pipeline_amqp::{AmqpBroker, Topology};
use order_pipeline_core::environment::SystemClock;
use order_pipeline_core::validation::OrderValidator;
use order_pipeline_core::{MessageBroker, OrderPublisher};
use order_pipeline_service::{Config, CreateOrderRequest, telemetry};
use std::io::Read;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init_tracing();

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read request from stdin")?;
    let request: CreateOrderRequest =
        serde_json::from_str(&input).context("Request is not a valid CreateOrderRequest")?;

    let broker = AmqpBroker::builder()
        .url(&config.broker.url)
        .exchange(&config.broker.exchange)
        .publish_timeout(config.publish_timeout())
        .connect()
        .await
        .context("Failed to connect to RabbitMQ")?;

    let topology = Topology::new(&config.broker.exchange, &config.broker.queue)
        .with_dead_letter(config.redelivery_policy().dead_letters());
    broker
        .declare_topology(&topology)
        .await
        .context("Failed to declare broker topology")?;

    let broker = Arc::new(broker);
    let clock = Arc::new(SystemClock);
    let order = request.into_record(clock.as_ref());

    let publisher = OrderPublisher::new(
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        config.broker.queue.clone(),
        OrderValidator::new(),
        clock,
    );
    let result = publisher.publish(&order).await;

    broker.close().await;
    result.context("Failed to publish order")?;
    println!("{}", order.order_code);
    Ok(())
}
