//! # Order Pipeline Testing
//!
//! Testing utilities for the order pipeline.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic time
//! - [`InMemoryBroker`]: queue semantics without a broker process
//! - [`InMemoryOrderStore`]: store semantics without a database, with
//!   failure injection
//! - Fixtures and a polling helper for asynchronous assertions
//!
//! ## Example
//!
//! ```ignore
//! use order_pipeline_testing::{InMemoryBroker, InMemoryOrderStore, encoded, sample_order};
//!
//! #[tokio::test]
//! async fn test_order_flow() {
//!     let broker = InMemoryBroker::new();
//!     broker.declare_queue("orders");
//!     broker.enqueue_raw("orders", encoded(&sample_order(1)));
//!
//!     let store = InMemoryOrderStore::new();
//!     // run a consumer over broker and store ...
//!     assert!(eventually(|| store.len() == 1).await);
//! }
//! ```

use chrono::{DateTime, Utc};
use order_pipeline_core::environment::Clock;

pub mod broker;
pub mod store;

/// Mock implementations of injected dependencies.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use order_pipeline_testing::mocks::FixedClock;
    /// use order_pipeline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Fixtures and assertion helpers.
pub mod helpers {
    use super::Clock;
    use super::mocks::test_clock;
    use order_pipeline_core::codec;
    use order_pipeline_core::order::{CustomerCode, OrderCode, OrderItem, OrderRecord};
    use std::time::Duration;

    /// A valid two-item order for customer 1, created at the test clock time.
    ///
    /// Total: 10 × 1.50 + 2 × 3.25 = 21.50.
    #[must_use]
    pub fn sample_order(code: i64) -> OrderRecord {
        OrderRecord::new(
            OrderCode::new(code),
            CustomerCode::new(1),
            vec![OrderItem::new("pen", 10, 1.50), OrderItem::new("ink", 2, 3.25)],
            test_clock().now(),
        )
    }

    /// Wire encoding of `order`.
    ///
    /// # Panics
    ///
    /// Panics if the order cannot be serialized (non-finite price).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn encoded(order: &OrderRecord) -> Vec<u8> {
        codec::encode(order).expect("fixture order should encode")
    }

    /// Poll `condition` every 10ms until it holds or two seconds pass.
    pub async fn eventually(condition: impl Fn() -> bool) -> bool {
        eventually_within(Duration::from_secs(2), condition).await
    }

    /// Poll `condition` every 10ms until it holds or `timeout` passes.
    pub async fn eventually_within(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// Re-export commonly used items
pub use broker::{InMemoryBroker, StoredMessage};
pub use helpers::{encoded, eventually, eventually_within, sample_order};
pub use mocks::{FixedClock, test_clock};
pub use store::InMemoryOrderStore;
