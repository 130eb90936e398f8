//! Validated trade orders

use std::fmt;

use crate::error::OrderError;

/// A single validated trade record.
///
/// Construction enforces the range and finiteness bounds below; once built,
/// an order is immutable and safe to move into books, queues and windows
/// without re-validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Order {
    /// Trade price, finite and within `[MIN_PRICE, MAX_PRICE]`
    pub price: f64,
    /// Trade amount, finite and within `[MIN_AMOUNT, MAX_AMOUNT]`
    pub amount: f64,
    /// Epoch seconds, within `[MIN_TIMESTAMP, MAX_TIMESTAMP]`
    pub timestamp: i64,
}

impl Order {
    /// Smallest accepted price
    pub const MIN_PRICE: f64 = 1e-4;
    /// Largest accepted price
    pub const MAX_PRICE: f64 = 1e6;
    /// Smallest accepted amount
    pub const MIN_AMOUNT: f64 = 1e-4;
    /// Largest accepted amount
    pub const MAX_AMOUNT: f64 = 1e5;
    /// Earliest accepted timestamp (epoch seconds, ~2001)
    pub const MIN_TIMESTAMP: i64 = 1_000_000_000;
    /// Latest accepted timestamp (epoch seconds, ~2033)
    pub const MAX_TIMESTAMP: i64 = 2_000_000_000;

    /// Validate and construct an order.
    pub fn new(price: f64, amount: f64, timestamp: i64) -> Result<Self, OrderError> {
        if !price.is_finite() {
            return Err(OrderError::NonFinitePrice(price));
        }
        if !(Self::MIN_PRICE..=Self::MAX_PRICE).contains(&price) {
            return Err(OrderError::PriceOutOfRange(price));
        }
        if !amount.is_finite() {
            return Err(OrderError::NonFiniteAmount(amount));
        }
        if !(Self::MIN_AMOUNT..=Self::MAX_AMOUNT).contains(&amount) {
            return Err(OrderError::AmountOutOfRange(amount));
        }
        if !(Self::MIN_TIMESTAMP..=Self::MAX_TIMESTAMP).contains(&timestamp) {
            return Err(OrderError::TimestampOutOfRange(timestamp));
        }
        Ok(Self {
            price,
            amount,
            timestamp,
        })
    }

    /// Canonical CSV line form, `price,amount,timestamp`.
    ///
    /// Parsing the canonical line reproduces the order exactly, which is what
    /// the integrity log's hash comparison relies on.
    pub fn to_feed_line(&self) -> String {
        format!("{},{},{}", self.price, self.amount, self.timestamp)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Order] price={:.2} amount={:.4} ts={}",
            self.price, self.amount, self.timestamp
        )
    }
}
