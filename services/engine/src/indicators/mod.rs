//! Technical indicators and their registry.
//!
//! Indicators consume completed candlesticks and expose a current value and
//! a trading signal drawn from the closed vocabulary
//! [`SIGNAL_BUY`] / [`SIGNAL_SELL`] / [`SIGNAL_HOLD`].

mod bollinger;
mod macd;
mod rsi;
mod sma;

pub use bollinger::BollingerBands;
pub use macd::Macd;
pub use rsi::Rsi;
pub use sma::Sma;

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use tickforge_types::Candlestick;

/// "buy" signal
pub const SIGNAL_BUY: &str = "buy";
/// "sell" signal
pub const SIGNAL_SELL: &str = "sell";
/// "hold" signal
pub const SIGNAL_HOLD: &str = "hold";

/// A polymorphic signal producer fed by completed candlesticks.
pub trait Indicator: Send {
    /// Fold one completed candle into the indicator's state.
    fn update(&mut self, candle: &Candlestick);

    /// Current trading signal: one of `buy`, `sell`, `hold`.
    fn signal(&self) -> &'static str;

    /// Current indicator value (meaning depends on the indicator).
    fn value(&self) -> f64;
}

/// Name-keyed collection of indicators with mutex-serialized updates.
///
/// Updates are serial under the registry lock, so indicators themselves need
/// no internal locking. Iteration order is unspecified; each registered
/// indicator is updated exactly once per [`update_all`](Self::update_all).
#[derive(Default)]
pub struct IndicatorRegistry {
    indicators: Mutex<HashMap<String, Box<dyn Indicator>>>,
}

impl IndicatorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an indicator under `name`, replacing any previous holder.
    pub fn register(&self, name: impl Into<String>, indicator: Box<dyn Indicator>) {
        let name = name.into();
        debug!(indicator = %name, "indicator registered");
        self.indicators.lock().insert(name, indicator);
    }

    /// Feed `candle` to every registered indicator.
    pub fn update_all(&self, candle: &Candlestick) {
        let mut indicators = self.indicators.lock();
        for (name, indicator) in indicators.iter_mut() {
            indicator.update(candle);
            debug!(indicator = %name, value = indicator.value(), "indicator updated");
        }
    }

    /// Snapshot of `(name, signal)` pairs.
    pub fn current_signals(&self) -> Vec<(String, &'static str)> {
        self.indicators
            .lock()
            .iter()
            .map(|(name, indicator)| (name.clone(), indicator.signal()))
            .collect()
    }

    /// Current value of one indicator, if registered.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.indicators.lock().get(name).map(|i| i.value())
    }

    /// Remove every indicator.
    pub fn reset(&self) {
        self.indicators.lock().clear();
    }

    /// Number of registered indicators.
    pub fn len(&self) -> usize {
        self.indicators.lock().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingIndicator {
        updates: Arc<AtomicUsize>,
    }

    impl Indicator for CountingIndicator {
        fn update(&mut self, _candle: &Candlestick) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }
        fn signal(&self) -> &'static str {
            SIGNAL_HOLD
        }
        fn value(&self) -> f64 {
            self.updates.load(Ordering::Relaxed) as f64
        }
    }

    fn candle() -> Candlestick {
        Candlestick::new(100.0, 101.0, 99.0, 100.5, 1.0, 1_725_000_000, 1_725_000_060).unwrap()
    }

    #[test]
    fn update_all_touches_each_indicator_exactly_once() {
        let registry = IndicatorRegistry::new();
        let counters: Vec<Arc<AtomicUsize>> =
            (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        for (i, c) in counters.iter().enumerate() {
            registry.register(
                format!("ind-{i}"),
                Box::new(CountingIndicator {
                    updates: Arc::clone(c),
                }),
            );
        }

        registry.update_all(&candle());
        for c in &counters {
            assert_eq!(c.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn register_replaces_same_name() {
        let registry = IndicatorRegistry::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        registry.register("x", Box::new(CountingIndicator { updates: a.clone() }));
        registry.register("x", Box::new(CountingIndicator { updates: b.clone() }));
        assert_eq!(registry.len(), 1);

        registry.update_all(&candle());
        assert_eq!(a.load(Ordering::Relaxed), 0);
        assert_eq!(b.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let registry = IndicatorRegistry::new();
        registry.register(
            "x",
            Box::new(CountingIndicator {
                updates: Arc::new(AtomicUsize::new(0)),
            }),
        );
        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.current_signals().is_empty());
    }
}
