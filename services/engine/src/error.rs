//! Engine error types

use thiserror::Error;
use tickforge_types::CandleError;

/// Failures surfaced by the aggregation pipeline
#[derive(Debug, Error)]
pub enum EngineError {
    /// Window volume summation left the finite range.
    ///
    /// Fatal for the affected window: the window is retained so the caller
    /// can inspect or retry, and the process continues.
    #[error("volume overflow while flushing window starting at {window_start}")]
    VolumeOverflow {
        /// Start of the window that failed to flush
        window_start: i64,
    },

    /// The assembled candle violated its own invariants.
    ///
    /// The window is retained for debugging.
    #[error("flush produced an invalid candle: {0}")]
    InvalidCandle(#[from] CandleError),

    /// Indicator construction rejected its parameters
    #[error("invalid indicator period: {0}")]
    InvalidPeriod(String),
}
