//! Bollinger bands

use tracing::warn;

use tickforge_buffers::FixedWindow;
use tickforge_types::Candlestick;

use super::{Indicator, SIGNAL_BUY, SIGNAL_HOLD, SIGNAL_SELL};
use crate::EngineError;

/// Bollinger bands over a close-price window.
///
/// Bands are `sma ± k * stddev` (population deviation). No signal is emitted
/// until the window is full; after that a close above the upper band is a
/// sell, below the lower band a buy.
pub struct BollingerBands {
    window: FixedWindow<f64>,
    multiplier: f64,

    sma: f64,
    stddev: f64,
    upper: f64,
    lower: f64,
    last_close: f64,
    last_signal: Option<&'static str>,
}

impl BollingerBands {
    /// Conventional 20-period, 2-sigma configuration.
    pub fn standard() -> Self {
        Self::new(20, 2.0).expect("standard period is non-zero")
    }

    /// Bands over `period` closes at `k` standard deviations.
    pub fn new(period: usize, k: f64) -> Result<Self, EngineError> {
        let window = FixedWindow::new(period)
            .map_err(|_| EngineError::InvalidPeriod("bollinger period must be > 0".into()))?;
        Ok(Self {
            window,
            multiplier: k,
            sma: 0.0,
            stddev: 0.0,
            upper: 0.0,
            lower: 0.0,
            last_close: 0.0,
            last_signal: None,
        })
    }

    /// Middle band.
    pub fn sma(&self) -> f64 {
        self.sma
    }

    /// Upper band.
    pub fn upper_band(&self) -> f64 {
        self.upper
    }

    /// Lower band.
    pub fn lower_band(&self) -> f64 {
        self.lower
    }

    /// Current band width.
    pub fn band_width(&self) -> f64 {
        self.upper - self.lower
    }
}

impl Indicator for BollingerBands {
    fn update(&mut self, candle: &Candlestick) {
        self.last_close = candle.close;
        self.window.push(self.last_close);

        let closes = self.window.to_vec();
        let n = closes.len() as f64;
        self.sma = closes.iter().sum::<f64>() / n;
        let variance = closes.iter().map(|c| (c - self.sma).powi(2)).sum::<f64>() / n;
        self.stddev = variance.sqrt();

        if !self.stddev.is_finite() || self.stddev < 1e-10 {
            if self.stddev != 0.0 {
                warn!(stddev = self.stddev, "degenerate bollinger deviation, clamping");
            }
            self.stddev = 0.0;
        }

        self.upper = self.sma + self.multiplier * self.stddev;
        self.lower = self.sma - self.multiplier * self.stddev;

        if self.window.len() < self.window.capacity() {
            self.last_signal = None;
            return;
        }

        self.last_signal = Some(if self.last_close > self.upper {
            SIGNAL_SELL
        } else if self.last_close < self.lower {
            SIGNAL_BUY
        } else {
            SIGNAL_HOLD
        });
    }

    fn signal(&self) -> &'static str {
        self.last_signal.unwrap_or(SIGNAL_HOLD)
    }

    fn value(&self) -> f64 {
        self.sma
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, start: i64) -> Candlestick {
        Candlestick::new(close, close, close, close, 1.0, start, start + 60).unwrap()
    }

    fn feed(bb: &mut BollingerBands, closes: &[f64]) {
        for (i, c) in closes.iter().enumerate() {
            bb.update(&candle(*c, 1_725_000_000 + 60 * i as i64));
        }
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(BollingerBands::new(0, 2.0).is_err());
    }

    #[test]
    fn holds_until_window_full() {
        let mut bb = BollingerBands::new(5, 2.0).unwrap();
        feed(&mut bb, &[100.0, 101.0, 99.0]);
        assert_eq!(bb.signal(), SIGNAL_HOLD);
    }

    #[test]
    fn flat_prices_clamp_deviation_to_zero() {
        let mut bb = BollingerBands::new(4, 2.0).unwrap();
        feed(&mut bb, &[100.0, 100.0, 100.0, 100.0]);
        assert_eq!(bb.band_width(), 0.0);
        assert_eq!(bb.signal(), SIGNAL_HOLD);
    }

    #[test]
    fn breakout_above_upper_band_signals_sell() {
        let mut bb = BollingerBands::new(4, 1.0).unwrap();
        feed(&mut bb, &[100.0, 101.0, 99.0, 100.0, 150.0]);
        assert_eq!(bb.signal(), SIGNAL_SELL);
    }

    #[test]
    fn breakdown_below_lower_band_signals_buy() {
        let mut bb = BollingerBands::new(4, 1.0).unwrap();
        feed(&mut bb, &[100.0, 101.0, 99.0, 100.0, 50.0]);
        assert_eq!(bb.signal(), SIGNAL_BUY);
    }

    #[test]
    fn value_tracks_middle_band() {
        let mut bb = BollingerBands::new(2, 2.0).unwrap();
        feed(&mut bb, &[100.0, 102.0]);
        assert!((bb.value() - 101.0).abs() < 1e-12);
    }
}
