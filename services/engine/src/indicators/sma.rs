//! Simple moving average

use tickforge_buffers::FixedWindow;
use tickforge_types::Candlestick;

use super::{Indicator, SIGNAL_BUY, SIGNAL_HOLD, SIGNAL_SELL};
use crate::EngineError;

/// Rolling mean of closes with crossover signals.
///
/// The signal fires when the latest close crosses the mean relative to the
/// previous close: upward crossing is a buy, downward a sell.
pub struct Sma {
    window: FixedWindow<f64>,
    sum: f64,
    last_sma: f64,
}

impl Sma {
    /// SMA over `period` closes.
    pub fn new(period: usize) -> Result<Self, EngineError> {
        let window = FixedWindow::new(period)
            .map_err(|_| EngineError::InvalidPeriod("sma period must be > 0".into()))?;
        Ok(Self {
            window,
            sum: 0.0,
            last_sma: 0.0,
        })
    }
}

impl Indicator for Sma {
    fn update(&mut self, candle: &Candlestick) {
        let close = candle.close;
        if self.window.len() == self.window.capacity() {
            // Evict the oldest close from the running sum before overwrite.
            if let Ok(oldest) = self.window.get(0) {
                self.sum -= oldest;
            }
        }
        self.window.push(close);
        self.sum += close;
        self.last_sma = self.sum / self.window.len() as f64;
    }

    fn signal(&self) -> &'static str {
        let len = self.window.len();
        if len < 2 {
            return SIGNAL_HOLD;
        }
        let prev = self.window.get(len - 2).unwrap_or(self.last_sma);
        let curr = self.window.get(len - 1).unwrap_or(self.last_sma);
        if curr > self.last_sma && prev <= self.last_sma {
            SIGNAL_BUY
        } else if curr < self.last_sma && prev >= self.last_sma {
            SIGNAL_SELL
        } else {
            SIGNAL_HOLD
        }
    }

    fn value(&self) -> f64 {
        self.last_sma
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, start: i64) -> Candlestick {
        Candlestick::new(close, close, close, close, 1.0, start, start + 60).unwrap()
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(Sma::new(0).is_err());
    }

    #[test]
    fn partial_window_averages_what_it_has() {
        let mut sma = Sma::new(4).unwrap();
        sma.update(&candle(10.0, 1_725_000_000));
        sma.update(&candle(20.0, 1_725_000_060));
        assert_eq!(sma.value(), 15.0);
    }

    #[test]
    fn full_window_evicts_oldest() {
        let mut sma = Sma::new(3).unwrap();
        for (i, close) in [10.0, 20.0, 30.0, 40.0].iter().enumerate() {
            sma.update(&candle(*close, 1_725_000_000 + 60 * i as i64));
        }
        // Window now holds 20, 30, 40
        assert!((sma.value() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn upward_crossover_signals_buy() {
        let mut sma = Sma::new(3).unwrap();
        for (i, close) in [100.0, 90.0, 120.0].iter().enumerate() {
            sma.update(&candle(*close, 1_725_000_000 + 60 * i as i64));
        }
        // mean ~103.3, prev=90 below, curr=120 above
        assert_eq!(sma.signal(), SIGNAL_BUY);
    }

    #[test]
    fn downward_crossover_signals_sell() {
        let mut sma = Sma::new(3).unwrap();
        for (i, close) in [100.0, 110.0, 80.0].iter().enumerate() {
            sma.update(&candle(*close, 1_725_000_000 + 60 * i as i64));
        }
        assert_eq!(sma.signal(), SIGNAL_SELL);
    }
}
