//! # Tickforge Engine
//!
//! Windowed OHLCV aggregation and indicator fan-out.
//!
//! Orders flow from the feed layer into a [`CandlestickGenerator`], which
//! buckets them into fixed-duration windows. When a window closes, the
//! completed [`Candlestick`](tickforge_types::Candlestick) is handed to an
//! optional dispatch callback and, when a registry and thread pool are bound,
//! to a pool task that updates every registered [`Indicator`]. Signals are
//! polled out of the [`IndicatorRegistry`].
//!
//! The generator owns a copy of each candle it dispatches, so callers are
//! free to use the returned value while indicator updates are still running
//! on the pool.

pub mod error;
pub mod fatal;
pub mod generator;
pub mod indicators;
pub mod pipeline;
pub mod pool;
pub mod synthetic;

pub use error::EngineError;
pub use generator::CandlestickGenerator;
pub use indicators::{
    BollingerBands, Indicator, IndicatorRegistry, Macd, Rsi, Sma, SIGNAL_BUY, SIGNAL_HOLD,
    SIGNAL_SELL,
};
pub use pipeline::Pipeline;
pub use pool::ThreadPool;
pub use synthetic::SyntheticTicker;
