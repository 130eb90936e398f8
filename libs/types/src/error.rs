//! Validation errors for the core value types

use thiserror::Error;

/// Rejections raised by [`crate::Order::new`]
///
/// Every variant carries the offending value so feed telemetry can log the
/// anomaly without re-parsing the input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    /// Price was NaN or infinite
    #[error("order price is not finite: {0}")]
    NonFinitePrice(f64),

    /// Price fell outside the accepted band
    #[error("order price {0} outside [{min}, {max}]", min = crate::Order::MIN_PRICE, max = crate::Order::MAX_PRICE)]
    PriceOutOfRange(f64),

    /// Amount was NaN or infinite
    #[error("order amount is not finite: {0}")]
    NonFiniteAmount(f64),

    /// Amount fell outside the accepted band
    #[error("order amount {0} outside [{min}, {max}]", min = crate::Order::MIN_AMOUNT, max = crate::Order::MAX_AMOUNT)]
    AmountOutOfRange(f64),

    /// Timestamp fell outside the accepted epoch window
    #[error("order timestamp {0} outside [{min}, {max}]", min = crate::Order::MIN_TIMESTAMP, max = crate::Order::MAX_TIMESTAMP)]
    TimestampOutOfRange(i64),
}

/// Rejections raised by [`crate::Candlestick::new`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    /// `low <= open <= high` was violated
    #[error("open {open} outside [low {low}, high {high}]")]
    OpenOutsideRange {
        /// Offending open price
        open: f64,
        /// Window low
        low: f64,
        /// Window high
        high: f64,
    },

    /// `low <= close <= high` was violated
    #[error("close {close} outside [low {low}, high {high}]")]
    CloseOutsideRange {
        /// Offending close price
        close: f64,
        /// Window low
        low: f64,
        /// Window high
        high: f64,
    },

    /// `start_time < end_time` was violated
    #[error("window start {start} is not before end {end}")]
    InvalidWindow {
        /// Window start (inclusive)
        start: i64,
        /// Window end (exclusive)
        end: i64,
    },

    /// Aggregate volume was negative
    #[error("negative volume: {0}")]
    NegativeVolume(f64),
}

/// Failure to parse an [`crate::AuthFlags`] wire string
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unknown auth flag: {0:?}")]
pub struct AuthFlagError(pub String);
