//! OHLCV candlesticks

use std::fmt;

use crate::error::CandleError;

/// Aggregate OHLCV record over one time window.
///
/// Invariants enforced at construction:
/// `low <= open <= high`, `low <= close <= high`, `start_time < end_time`,
/// `volume >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candlestick {
    /// First trade price in the window
    pub open: f64,
    /// Highest trade price in the window
    pub high: f64,
    /// Lowest trade price in the window
    pub low: f64,
    /// Last trade price in the window
    pub close: f64,
    /// Sum of trade amounts in the window
    pub volume: f64,
    /// Window start (epoch seconds, inclusive)
    pub start_time: i64,
    /// Window end (epoch seconds, exclusive)
    pub end_time: i64,
}

impl Candlestick {
    /// Validate and construct a candlestick.
    pub fn new(
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        start_time: i64,
        end_time: i64,
    ) -> Result<Self, CandleError> {
        if !(low <= open && open <= high) {
            return Err(CandleError::OpenOutsideRange { open, low, high });
        }
        if !(low <= close && close <= high) {
            return Err(CandleError::CloseOutsideRange { close, low, high });
        }
        if start_time >= end_time {
            return Err(CandleError::InvalidWindow {
                start: start_time,
                end: end_time,
            });
        }
        if volume < 0.0 {
            return Err(CandleError::NegativeVolume(volume));
        }
        Ok(Self {
            open,
            high,
            low,
            close,
            volume,
            start_time,
            end_time,
        })
    }
}

impl fmt::Display for Candlestick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Candle] o={:.2} h={:.2} l={:.2} c={:.2} v={:.4} window=[{}, {})",
            self.open, self.high, self.low, self.close, self.volume, self.start_time, self.end_time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_candle() {
        let c = Candlestick::new(100.0, 102.0, 99.5, 101.0, 4.5, 1_725_000_000, 1_725_000_060)
            .unwrap();
        assert_eq!(c.open, 100.0);
        assert_eq!(c.end_time, 1_725_000_060);
    }

    #[test]
    fn flat_window_is_valid() {
        // All prices equal, zero volume
        assert!(Candlestick::new(100.0, 100.0, 100.0, 100.0, 0.0, 1, 2).is_ok());
    }

    #[test]
    fn rejects_open_outside_band() {
        assert!(matches!(
            Candlestick::new(103.0, 102.0, 99.5, 101.0, 1.0, 1, 2),
            Err(CandleError::OpenOutsideRange { .. })
        ));
    }

    #[test]
    fn rejects_close_outside_band() {
        assert!(matches!(
            Candlestick::new(100.0, 102.0, 99.5, 98.0, 1.0, 1, 2),
            Err(CandleError::CloseOutsideRange { .. })
        ));
    }

    #[test]
    fn rejects_inverted_window() {
        assert!(matches!(
            Candlestick::new(100.0, 102.0, 99.5, 101.0, 1.0, 2, 2),
            Err(CandleError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn rejects_negative_volume() {
        assert!(matches!(
            Candlestick::new(100.0, 102.0, 99.5, 101.0, -0.5, 1, 2),
            Err(CandleError::NegativeVolume(_))
        ));
    }
}
