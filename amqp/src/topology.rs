//! Exchange, queue, and binding declarations.
//!
//! Every declaration is idempotent: running [`Topology::declare`] against a
//! broker that already has the same objects is a no-op. Declaring with
//! different flags than an existing object fails with a channel error, which
//! surfaces as [`BrokerError::TopologyFailed`].

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use order_pipeline_core::broker::{BrokerError, dead_letter_queue};

/// The broker objects the order pipeline relies on.
///
/// - a durable direct exchange
/// - a durable queue bound to it with its own name as routing key
/// - optionally, `<queue>.dead-letter` bound the same way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    exchange: String,
    queue: String,
    dead_letter: bool,
}

impl Topology {
    /// Topology for `queue` on `exchange`, without a dead-letter queue.
    #[must_use]
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            dead_letter: false,
        }
    }

    /// Also declare and bind the dead-letter queue.
    #[must_use]
    pub const fn with_dead_letter(mut self, enabled: bool) -> Self {
        self.dead_letter = enabled;
        self
    }

    /// Exchange name.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Work queue name, also its routing key.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Dead-letter queue name, if enabled.
    #[must_use]
    pub fn dead_letter_queue(&self) -> Option<String> {
        self.dead_letter.then(|| dead_letter_queue(&self.queue))
    }

    /// Queues to declare, work queue first.
    fn queues(&self) -> Vec<String> {
        let mut queues = vec![self.queue.clone()];
        queues.extend(self.dead_letter_queue());
        queues
    }

    /// Declare the exchange, the queues, and their bindings.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TopologyFailed`] naming the object that could not
    /// be declared.
    pub async fn declare(&self, channel: &Channel) -> Result<(), BrokerError> {
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::TopologyFailed {
                name: self.exchange.clone(),
                reason: e.to_string(),
            })?;

        for queue in self.queues() {
            channel
                .queue_declare(
                    &queue,
                    QueueDeclareOptions {
                        durable: true,
                        exclusive: false,
                        auto_delete: false,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::TopologyFailed {
                    name: queue.clone(),
                    reason: e.to_string(),
                })?;

            channel
                .queue_bind(
                    &queue,
                    &self.exchange,
                    &queue,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::TopologyFailed {
                    name: format!("{queue} -> {}", self.exchange),
                    reason: e.to_string(),
                })?;
        }

        tracing::info!(
            exchange = %self.exchange,
            queue = %self.queue,
            dead_letter = self.dead_letter,
            "Topology declared"
        );
        Ok(())
    }
}
