//! Relative strength index

use tickforge_buffers::FixedWindow;
use tickforge_types::Candlestick;

use super::{Indicator, SIGNAL_BUY, SIGNAL_HOLD, SIGNAL_SELL};
use crate::EngineError;

/// RSI over simple gain/loss averages.
///
/// The first candle only primes the reference close. With no losses in the
/// window the index saturates at 100. Overbought at 70, oversold at 30.
pub struct Rsi {
    gains: FixedWindow<f64>,
    losses: FixedWindow<f64>,
    last_close: Option<f64>,
    rsi: f64,
}

impl Rsi {
    /// RSI over `period` close-to-close deltas.
    pub fn new(period: usize) -> Result<Self, EngineError> {
        let mk = || {
            FixedWindow::new(period)
                .map_err(|_| EngineError::InvalidPeriod("rsi period must be > 0".into()))
        };
        Ok(Self {
            gains: mk()?,
            losses: mk()?,
            last_close: None,
            rsi: 50.0,
        })
    }
}

impl Indicator for Rsi {
    fn update(&mut self, candle: &Candlestick) {
        let close = candle.close;
        let last = match self.last_close {
            Some(last) => last,
            None => {
                self.last_close = Some(close);
                return;
            }
        };

        let delta = close - last;
        self.gains.push(delta.max(0.0));
        self.losses.push((-delta).max(0.0));

        let n = self.gains.len() as f64;
        let avg_gain: f64 = self.gains.to_vec().iter().sum::<f64>() / n;
        let avg_loss: f64 = self.losses.to_vec().iter().sum::<f64>() / n;

        self.rsi = if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        };
        self.last_close = Some(close);
    }

    fn signal(&self) -> &'static str {
        if self.rsi >= 70.0 {
            SIGNAL_SELL
        } else if self.rsi <= 30.0 {
            SIGNAL_BUY
        } else {
            SIGNAL_HOLD
        }
    }

    fn value(&self) -> f64 {
        self.rsi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, start: i64) -> Candlestick {
        Candlestick::new(close, close, close, close, 1.0, start, start + 60).unwrap()
    }

    fn feed(rsi: &mut Rsi, closes: &[f64]) {
        for (i, c) in closes.iter().enumerate() {
            rsi.update(&candle(*c, 1_725_000_000 + 60 * i as i64));
        }
    }

    #[test]
    fn first_candle_only_primes() {
        let mut rsi = Rsi::new(14).unwrap();
        rsi.update(&candle(100.0, 1_725_000_000));
        assert_eq!(rsi.value(), 50.0);
        assert_eq!(rsi.signal(), SIGNAL_HOLD);
    }

    #[test]
    fn monotonic_gains_saturate_at_100() {
        let mut rsi = Rsi::new(5).unwrap();
        feed(&mut rsi, &[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        assert_eq!(rsi.value(), 100.0);
        assert_eq!(rsi.signal(), SIGNAL_SELL);
    }

    #[test]
    fn monotonic_losses_signal_buy() {
        let mut rsi = Rsi::new(5).unwrap();
        feed(&mut rsi, &[105.0, 104.0, 103.0, 102.0, 101.0, 100.0]);
        assert_eq!(rsi.value(), 0.0);
        assert_eq!(rsi.signal(), SIGNAL_BUY);
    }

    #[test]
    fn balanced_moves_hold_near_50() {
        let mut rsi = Rsi::new(4).unwrap();
        feed(&mut rsi, &[100.0, 101.0, 100.0, 101.0, 100.0]);
        assert!(rsi.value() > 30.0 && rsi.value() < 70.0);
        assert_eq!(rsi.signal(), SIGNAL_HOLD);
    }
}
