//! Moving average convergence/divergence

use tracing::debug;

use tickforge_types::Candlestick;

use super::{Indicator, SIGNAL_BUY, SIGNAL_HOLD, SIGNAL_SELL};
use crate::EngineError;

/// MACD with EMA smoothing and histogram-flip crossovers.
///
/// The first candle primes all three EMAs. Crossovers only latch once the
/// indicator has warmed up (`steps >= slow + signal`), and require the
/// histogram to clear a small noise threshold when it flips sign.
pub struct Macd {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,

    fast_ema: f64,
    slow_ema: f64,
    signal_ema: f64,

    macd_line: f64,
    signal_line: f64,
    histogram: f64,
    last_histogram: f64,

    steps: usize,
    last_close: Option<f64>,
    last_crossover: Option<&'static str>,
}

impl Macd {
    /// Conventional 12/26/9 configuration.
    pub fn standard() -> Self {
        Self::new(12, 26, 9).expect("standard periods are non-zero")
    }

    /// MACD with explicit fast/slow/signal periods, all non-zero.
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, EngineError> {
        if fast == 0 || slow == 0 || signal == 0 {
            return Err(EngineError::InvalidPeriod(
                "macd periods must all be > 0".into(),
            ));
        }
        Ok(Self {
            fast_period: fast,
            slow_period: slow,
            signal_period: signal,
            fast_ema: 0.0,
            slow_ema: 0.0,
            signal_ema: 0.0,
            macd_line: 0.0,
            signal_line: 0.0,
            histogram: 0.0,
            last_histogram: 0.0,
            steps: 0,
            last_close: None,
            last_crossover: None,
        })
    }

    fn ema(value: f64, prev: f64, period: usize) -> f64 {
        let multiplier = 2.0 / (period as f64 + 1.0);
        (value - prev) * multiplier + prev
    }

    /// MACD line (fast EMA minus slow EMA).
    pub fn macd_line(&self) -> f64 {
        self.macd_line
    }

    /// Signal line (EMA of the MACD line).
    pub fn signal_line(&self) -> f64 {
        self.signal_line
    }

    /// Latched crossover, if one has fired since warmup.
    pub fn last_crossover(&self) -> Option<&'static str> {
        self.last_crossover
    }

    fn warmed_up(&self) -> bool {
        self.steps >= self.slow_period + self.signal_period
    }
}

impl Indicator for Macd {
    fn update(&mut self, candle: &Candlestick) {
        let close = candle.close;
        if self.last_close.is_none() {
            self.fast_ema = close;
            self.slow_ema = close;
            self.signal_ema = close;
            self.last_close = Some(close);
            self.steps += 1;
            return;
        }

        self.fast_ema = Self::ema(close, self.fast_ema, self.fast_period);
        self.slow_ema = Self::ema(close, self.slow_ema, self.slow_period);
        self.macd_line = self.fast_ema - self.slow_ema;

        self.signal_ema = Self::ema(self.macd_line, self.signal_ema, self.signal_period);
        self.signal_line = self.signal_ema;

        self.last_histogram = self.histogram;
        self.histogram = self.macd_line - self.signal_line;

        if self.warmed_up() {
            let threshold = (self.histogram.abs() * 1e-3).max(1e-6);
            if self.last_histogram <= 0.0 && self.histogram > threshold {
                self.last_crossover = Some(SIGNAL_BUY);
                debug!(steps = self.steps, "macd histogram flipped positive");
            } else if self.last_histogram >= 0.0 && self.histogram < -threshold {
                self.last_crossover = Some(SIGNAL_SELL);
                debug!(steps = self.steps, "macd histogram flipped negative");
            }
        }

        self.last_close = Some(close);
        self.steps += 1;
    }

    fn signal(&self) -> &'static str {
        if !self.warmed_up() {
            return SIGNAL_HOLD;
        }
        self.last_crossover.unwrap_or(SIGNAL_HOLD)
    }

    fn value(&self) -> f64 {
        self.histogram
    }
}
