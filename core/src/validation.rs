//! Order record validation.
//!
//! [`OrderValidator`] is a plain value. Whoever needs it constructs one and
//! passes it by reference; the publisher checks before sending and the
//! processor checks again before writing.

use crate::money::{self, PriceError};
use crate::order::OrderRecord;
use std::fmt;
use thiserror::Error;

/// Default upper bound on items per order.
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Default upper bound on product name length, in characters.
pub const DEFAULT_MAX_PRODUCT_LEN: usize = 255;

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Path of the offending field, e.g. `items[2].quantity`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldViolation {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All violations found in one record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid order: {}", join(.violations))]
pub struct ValidationError {
    /// Every failed check, in field order.
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Whether any violation concerns `field`.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn join(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Checks the invariants an order must satisfy before it is published or
/// persisted.
///
/// # Example
///
/// ```
/// use order_pipeline_core::validation::OrderValidator;
///
/// let validator = OrderValidator::new().with_max_items(10);
/// assert_eq!(validator.max_items(), 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderValidator {
    max_items: usize,
    max_product_len: usize,
}

impl Default for OrderValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderValidator {
    /// Validator with default limits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_product_len: DEFAULT_MAX_PRODUCT_LEN,
        }
    }

    /// Validator with explicit limits.
    #[must_use]
    pub const fn with_limits(max_items: usize, max_product_len: usize) -> Self {
        Self {
            max_items,
            max_product_len,
        }
    }

    /// Set the maximum number of items.
    #[must_use]
    pub const fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Set the maximum product name length.
    #[must_use]
    pub const fn with_max_product_len(mut self, max_product_len: usize) -> Self {
        self.max_product_len = max_product_len;
        self
    }

    /// Configured item limit.
    #[must_use]
    pub const fn max_items(&self) -> usize {
        self.max_items
    }

    /// Configured product name limit.
    #[must_use]
    pub const fn max_product_len(&self) -> usize {
        self.max_product_len
    }

    /// Check an order, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] listing each failed check.
    pub fn validate(&self, order: &OrderRecord) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if order.customer_code.value() <= 0 {
            violations.push(FieldViolation::new("customerCode", "must be positive"));
        }
        if order.order_code.value() <= 0 {
            violations.push(FieldViolation::new("orderCode", "must be positive"));
        }
        if order.items.is_empty() {
            violations.push(FieldViolation::new("items", "must contain at least one item"));
        }
        if order.items.len() > self.max_items {
            violations.push(FieldViolation::new(
                "items",
                format!("must contain at most {} items", self.max_items),
            ));
        }

        for (index, item) in order.items.iter().enumerate() {
            if item.product.trim().is_empty() {
                violations.push(FieldViolation::new(
                    format!("items[{index}].product"),
                    "must not be blank",
                ));
            } else if item.product.chars().count() > self.max_product_len {
                violations.push(FieldViolation::new(
                    format!("items[{index}].product"),
                    format!("must be at most {} characters", self.max_product_len),
                ));
            }
            if item.quantity <= 0 {
                violations.push(FieldViolation::new(
                    format!("items[{index}].quantity"),
                    "must be positive",
                ));
            }
            if !item.price.is_finite() {
                violations.push(FieldViolation::new(
                    format!("items[{index}].price"),
                    "must be a finite number",
                ));
            } else if item.price <= 0.0 {
                violations.push(FieldViolation::new(
                    format!("items[{index}].price"),
                    "must be positive",
                ));
            } else if let Err(e @ PriceError::BelowSmallestUnit { .. }) =
                money::to_store_price(item.price)
            {
                violations.push(FieldViolation::new(
                    format!("items[{index}].price"),
                    e.to_string(),
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }
}
