//! Generator scenarios: window aggregation, late orders, dispatch fan-out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tickforge_engine::{
    CandlestickGenerator, Indicator, IndicatorRegistry, Sma, ThreadPool, SIGNAL_HOLD,
};
use tickforge_types::{Candlestick, Order};

fn order(price: f64, amount: f64, ts: i64) -> Order {
    Order::new(price, amount, ts).unwrap()
}

#[test]
fn happy_path_candle() {
    let gen = CandlestickGenerator::new(60);
    gen.insert(order(100.0, 1.0, 1_725_000_000));
    gen.insert(order(101.0, 2.0, 1_725_000_020));
    gen.insert(order(102.0, 1.5, 1_725_000_050));

    assert!(gen.flush_if_ready(1_725_000_055).unwrap().is_none());

    let candle = gen.flush_if_ready(1_725_000_061).unwrap().unwrap();
    assert_eq!(candle.open, 100.0);
    assert_eq!(candle.high, 102.0);
    assert_eq!(candle.low, 100.0);
    assert_eq!(candle.close, 102.0);
    assert_eq!(candle.volume, 4.5);
    assert_eq!(candle.start_time, 1_725_000_000);
    assert_eq!(candle.end_time, 1_725_000_060);
}

#[test]
fn late_order_does_not_change_the_candle() {
    let gen = CandlestickGenerator::new(60);
    gen.insert(order(100.0, 1.0, 1_725_000_000));
    gen.insert(order(101.0, 2.0, 1_725_000_020));
    gen.insert(order(102.0, 1.5, 1_725_000_050));
    gen.insert(order(105.0, 1.0, 1_725_000_100)); // late

    assert_eq!(gen.late_orders(), 1);

    let candle = gen.flush_if_ready(1_725_000_061).unwrap().unwrap();
    assert_eq!(candle.high, 102.0);
    assert_eq!(candle.close, 102.0);
    assert_eq!(candle.volume, 4.5);
}

#[test]
fn dispatch_callback_fires_synchronously() {
    let gen = CandlestickGenerator::new(60);
    let seen: Arc<Mutex<Vec<Candlestick>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    gen.set_dispatch(Box::new(move |candle| sink.lock().push(*candle)));

    gen.insert(order(100.0, 1.0, 1_725_000_000));
    let returned = gen.flush_if_ready(1_725_000_061).unwrap().unwrap();

    let dispatched = seen.lock();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0], returned);
}

#[test]
fn flush_fans_out_to_indicators_through_the_pool() {
    struct Probe {
        updates: Arc<AtomicUsize>,
        last_close: Arc<Mutex<f64>>,
    }
    impl Indicator for Probe {
        fn update(&mut self, candle: &Candlestick) {
            *self.last_close.lock() = candle.close;
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        fn signal(&self) -> &'static str {
            SIGNAL_HOLD
        }
        fn value(&self) -> f64 {
            self.updates.load(Ordering::SeqCst) as f64
        }
    }

    let updates = Arc::new(AtomicUsize::new(0));
    let last_close = Arc::new(Mutex::new(0.0));
    let registry = Arc::new(IndicatorRegistry::new());
    registry.register(
        "probe",
        Box::new(Probe {
            updates: Arc::clone(&updates),
            last_close: Arc::clone(&last_close),
        }),
    );
    registry.register("sma", Box::new(Sma::new(3).unwrap()));

    let pool = Arc::new(ThreadPool::new(2));
    let gen = CandlestickGenerator::new(60);
    gen.bind_registry(Arc::clone(&registry));
    gen.bind_thread_pool(Arc::clone(&pool));

    gen.insert(order(100.0, 1.0, 1_725_000_000));
    let candle = gen.flush_if_ready(1_725_000_061).unwrap().unwrap();

    // The caller owns the returned candle while the pool task runs its own
    // copy; dropping the generator and pool drains the queue.
    drop(gen);
    drop(Arc::try_unwrap(pool).ok().expect("generator handle released"));

    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(*last_close.lock(), candle.close);
    assert_eq!(registry.value_of("sma").unwrap(), candle.close);
}

#[test]
fn second_window_aggregates_independently() {
    let gen = CandlestickGenerator::new(60);
    gen.insert(order(100.0, 1.0, 1_725_000_000));
    gen.flush_if_ready(1_725_000_061).unwrap().unwrap();

    gen.insert(order(200.0, 2.0, 1_725_000_100));
    let candle = gen.flush_if_ready(1_725_000_161).unwrap().unwrap();
    assert_eq!(candle.open, 200.0);
    assert_eq!(candle.start_time, 1_725_000_100);
    assert_eq!(candle.volume, 2.0);
}
