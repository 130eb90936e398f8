//! Synthetic candle driver for soak-testing indicators

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::info;

use tickforge_types::Candlestick;

use crate::indicators::IndicatorRegistry;

/// Feeds a registry with synthetic candles at a fixed interval.
///
/// Useful for exercising indicator wiring without a live feed. The ticker
/// owns one background thread; `stop` (or drop) joins it.
pub struct SyntheticTicker {
    registry: Arc<IndicatorRegistry>,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticTicker {
    /// Ticker feeding `registry` every `interval`.
    pub fn new(registry: Arc<IndicatorRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Start the background tick thread; a second start is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::Release);
        let registry = Arc::clone(&self.registry);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        self.handle = Some(std::thread::spawn(move || {
            let mut tick = 0i64;
            while running.load(Ordering::Acquire) {
                let base = 100.0 + tick as f64;
                let candle = Candlestick::new(
                    base,
                    base + 1.0,
                    base - 1.0,
                    base + 0.5,
                    1.0,
                    1_725_000_000 + tick,
                    1_725_000_000 + tick + 1,
                )
                .expect("synthetic candle is always valid");
                registry.update_all(&candle);
                std::thread::sleep(interval);
                tick += 1;
            }
        }));
        info!("synthetic ticker started");
    }

    /// Stop and join the tick thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyntheticTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{Indicator, SIGNAL_HOLD};
    use std::sync::atomic::AtomicUsize;

    struct Probe(Arc<AtomicUsize>);

    impl Indicator for Probe {
        fn update(&mut self, _candle: &Candlestick) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
        fn signal(&self) -> &'static str {
            SIGNAL_HOLD
        }
        fn value(&self) -> f64 {
            0.0
        }
    }

    #[test]
    fn ticks_flow_until_stopped() {
        let registry = Arc::new(IndicatorRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));
        registry.register("probe", Box::new(Probe(Arc::clone(&count))));

        let mut ticker = SyntheticTicker::new(Arc::clone(&registry), Duration::from_millis(5));
        ticker.start();
        std::thread::sleep(Duration::from_millis(60));
        ticker.stop();

        let after_stop = count.load(Ordering::Relaxed);
        assert!(after_stop > 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), after_stop);
    }
}
