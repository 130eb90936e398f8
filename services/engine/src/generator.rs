//! Windowed OHLCV aggregation

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use tickforge_types::{Candlestick, Order};

use crate::indicators::IndicatorRegistry;
use crate::pool::ThreadPool;
use crate::EngineError;

/// Callback fired synchronously from inside a flush; must not block long.
pub type DispatchFn = Box<dyn Fn(&Candlestick) + Send + Sync>;

/// Upper bound on orders buffered in one window before new arrivals are
/// counted as dropped.
const MAX_WINDOW_ORDERS: usize = 65_536;

struct GenState {
    window: Vec<Order>,
    window_start: i64,
    accepted: u64,
    late: u64,
    dropped: u64,
    on_candle: Option<DispatchFn>,
    registry: Option<Arc<IndicatorRegistry>>,
    pool: Option<Arc<ThreadPool>>,
}

/// Buckets orders into fixed-duration windows and emits OHLCV candles.
///
/// The window opens at the timestamp of its first order. Orders at or past
/// `window_start + window_duration` are late: counted, never raised. A flush
/// closes the window only once `current_time` has passed its end.
///
/// On flush the candle is (in order) handed to the dispatch callback, then
/// submitted to the thread pool as an owned copy for indicator fan-out, then
/// returned to the caller — who fully owns the returned value and may use it
/// while the pool task is still running.
pub struct CandlestickGenerator {
    window_duration: i64,
    state: Mutex<GenState>,
}

impl CandlestickGenerator {
    /// Generator with `window_duration` in seconds.
    pub fn new(window_duration: i64) -> Self {
        Self {
            window_duration,
            state: Mutex::new(GenState {
                window: Vec::new(),
                window_start: 0,
                accepted: 0,
                late: 0,
                dropped: 0,
                on_candle: None,
                registry: None,
                pool: None,
            }),
        }
    }

    /// Window length in seconds.
    pub fn window_duration(&self) -> i64 {
        self.window_duration
    }

    /// Install the synchronous dispatch callback.
    pub fn set_dispatch(&self, callback: DispatchFn) {
        self.state.lock().on_candle = Some(callback);
    }

    /// Bind the indicator registry updated on every flush.
    pub fn bind_registry(&self, registry: Arc<IndicatorRegistry>) {
        self.state.lock().registry = Some(registry);
    }

    /// Bind the pool that runs indicator updates off the flush path.
    pub fn bind_thread_pool(&self, pool: Arc<ThreadPool>) {
        self.state.lock().pool = Some(pool);
    }

    /// Add an order to the current window.
    pub fn insert(&self, order: Order) {
        let mut s = self.state.lock();
        if s.window.is_empty() {
            s.window_start = order.timestamp;
        }
        if order.timestamp < s.window_start + self.window_duration {
            if s.window.len() >= MAX_WINDOW_ORDERS {
                s.dropped += 1;
                return;
            }
            s.window.push(order);
            s.accepted += 1;
        } else {
            trace!(ts = order.timestamp, window_start = s.window_start, "late order dropped");
            s.late += 1;
        }
    }

    /// Close and emit the current window if `current_time` has passed its end.
    ///
    /// Returns `Ok(None)` when the window is empty or still open. On
    /// [`EngineError::VolumeOverflow`] or an invalid candle the window is
    /// left intact for inspection or retry.
    pub fn flush_if_ready(&self, current_time: i64) -> Result<Option<Candlestick>, EngineError> {
        let mut s = self.state.lock();
        if s.window.is_empty() {
            return Ok(None);
        }
        let window_end = s.window_start + self.window_duration;
        if current_time < window_end {
            return Ok(None);
        }

        let open = s.window.first().expect("window checked non-empty").price;
        let close = s.window.last().expect("window checked non-empty").price;
        let mut high = open;
        let mut low = open;
        let mut volume = 0.0f64;
        for order in &s.window {
            high = high.max(order.price);
            low = low.min(order.price);
            volume += order.amount;
            if !volume.is_finite() {
                return Err(EngineError::VolumeOverflow {
                    window_start: s.window_start,
                });
            }
        }

        let candle = Candlestick::new(open, high, low, close, volume, s.window_start, window_end)?;

        if let Some(callback) = &s.on_candle {
            callback(&candle);
        }
        if let (Some(registry), Some(pool)) = (&s.registry, &s.pool) {
            // The task owns its own copy; generator state is never aliased
            // into the worker.
            let registry = Arc::clone(registry);
            let task_candle = candle;
            pool.submit(move || registry.update_all(&task_candle));
        }

        debug!(%candle, orders = s.window.len(), "window flushed");
        s.window.clear();
        s.accepted = 0;
        s.late = 0;
        s.dropped = 0;
        Ok(Some(candle))
    }

    /// Orders accepted into the current window.
    pub fn accepted(&self) -> u64 {
        self.state.lock().accepted
    }

    /// Orders rejected as late for the current window.
    pub fn late_orders(&self) -> u64 {
        self.state.lock().late
    }

    /// Orders dropped because the window buffer was full.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(price: f64, amount: f64, ts: i64) -> Order {
        Order::new(price, amount, ts).unwrap()
    }

    #[test]
    fn empty_window_never_flushes() {
        let gen = CandlestickGenerator::new(60);
        assert!(gen.flush_if_ready(i64::MAX).unwrap().is_none());
    }

    #[test]
    fn window_opens_at_first_order() {
        let gen = CandlestickGenerator::new(60);
        gen.insert(order(100.0, 1.0, 1_725_000_030));
        // Not ready one second before the window ends.
        assert!(gen.flush_if_ready(1_725_000_089).unwrap().is_none());
        let candle = gen.flush_if_ready(1_725_000_090).unwrap().unwrap();
        assert_eq!(candle.start_time, 1_725_000_030);
        assert_eq!(candle.end_time, 1_725_000_090);
    }

    #[test]
    fn late_orders_are_counted_not_raised() {
        let gen = CandlestickGenerator::new(60);
        gen.insert(order(100.0, 1.0, 1_725_000_000));
        gen.insert(order(105.0, 1.0, 1_725_000_100));
        assert_eq!(gen.accepted(), 1);
        assert_eq!(gen.late_orders(), 1);
    }

    #[test]
    fn counters_reset_on_flush() {
        let gen = CandlestickGenerator::new(60);
        gen.insert(order(100.0, 1.0, 1_725_000_000));
        gen.insert(order(105.0, 1.0, 1_725_000_100));
        gen.flush_if_ready(1_725_000_061).unwrap().unwrap();
        assert_eq!(gen.accepted(), 0);
        assert_eq!(gen.late_orders(), 0);
    }
}
