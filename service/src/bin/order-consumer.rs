//! Order consumer.
//!
//! Declares the broker topology, migrates the store, and runs the consumer
//! loop until SIGINT or SIGTERM.

use anyhow::Context;
use order_pipeline_amqp::{AmqpBroker, Topology};
use order_pipeline_core::MessageBroker;
use order_pipeline_core::validation::OrderValidator;
use order_pipeline_postgres::PostgresOrderStore;
use order_pipeline_runtime::{OrderConsumer, OrderProcessor};
use order_pipeline_service::{Config, shutdown_signal, telemetry};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init_tracing();

    info!(
        app_env = %config.app_env,
        exchange = %config.broker.exchange,
        queue = %config.broker.queue,
        max_attempts = config.consumer.max_attempts,
        "Starting order consumer"
    );

    if let Some(addr) = config.metrics_addr {
        telemetry::install_prometheus(addr).context("Failed to start metrics exporter")?;
    }

    let policy = config.redelivery_policy();

    let broker = AmqpBroker::builder()
        .url(&config.broker.url)
        .exchange(&config.broker.exchange)
        .publish_timeout(config.publish_timeout())
        .connect()
        .await
        .context("Failed to connect to RabbitMQ")?;

    let topology = Topology::new(&config.broker.exchange, &config.broker.queue)
        .with_dead_letter(policy.dead_letters());
    broker
        .declare_topology(&topology)
        .await
        .context("Failed to declare broker topology")?;

    let store = PostgresOrderStore::connect_with(
        &config.database.url,
        config.database.max_connections,
        config.connect_timeout(),
    )
    .await
    .context("Failed to connect to PostgreSQL")?;
    store.migrate().await.context("Failed to run migrations")?;

    let broker = Arc::new(broker);
    let processor = OrderProcessor::new(Arc::new(store.clone()), OrderValidator::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = OrderConsumer::new(
        config.broker.queue.clone(),
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        processor,
        shutdown_rx,
    )
    .with_redelivery_policy(policy)
    .with_retry_delay(config.retry_delay())
    .spawn();

    shutdown_signal().await;

    if shutdown_tx.send(true).is_err() {
        warn!("Consumer already stopped");
    }
    if let Err(e) = consumer.await {
        warn!(error = %e, "Consumer task ended abnormally");
    }

    broker.close().await;
    store.close().await;
    info!("Order consumer stopped");
    Ok(())
}
