//! Order consumer wiring the book and the generator together

use std::sync::Arc;

use tickforge_book::OrderBook;
use tickforge_types::{Candlestick, Order};

use crate::generator::CandlestickGenerator;
use crate::EngineError;

/// Drains parsed orders into the book and the candlestick generator.
///
/// Flushes are event-time driven: every ingested order advances the
/// generator's clock to its own timestamp, so a window closes as soon as an
/// order from the next window arrives. [`finish`](Pipeline::finish) closes
/// the final window once the feeds have completed.
pub struct Pipeline {
    book: Arc<OrderBook>,
    generator: Arc<CandlestickGenerator>,
    last_ts: i64,
    candles_emitted: u64,
}

impl Pipeline {
    /// Pipeline over an existing book and generator.
    pub fn new(book: Arc<OrderBook>, generator: Arc<CandlestickGenerator>) -> Self {
        Self {
            book,
            generator,
            last_ts: 0,
            candles_emitted: 0,
        }
    }

    /// Ingest one order, returning a candle when its arrival closed a window.
    pub fn ingest(&mut self, order: Order) -> Result<Option<Candlestick>, EngineError> {
        self.last_ts = self.last_ts.max(order.timestamp);
        // Flush before inserting so an order from the next window does not
        // land in the closing one.
        let flushed = self.generator.flush_if_ready(self.last_ts)?;
        self.book.insert(order);
        self.generator.insert(order);
        if flushed.is_some() {
            self.candles_emitted += 1;
        }
        Ok(flushed)
    }

    /// Close the final window after the feeds have completed.
    pub fn finish(&mut self) -> Result<Option<Candlestick>, EngineError> {
        let cutoff = self.last_ts + self.generator.window_duration();
        let flushed = self.generator.flush_if_ready(cutoff)?;
        if flushed.is_some() {
            self.candles_emitted += 1;
        }
        Ok(flushed)
    }

    /// Candles emitted so far.
    pub fn candles_emitted(&self) -> u64 {
        self.candles_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(price: f64, ts: i64) -> Order {
        Order::new(price, 1.0, ts).unwrap()
    }

    #[test]
    fn next_window_order_closes_previous_window() {
        let book = Arc::new(OrderBook::new());
        let gen = Arc::new(CandlestickGenerator::new(60));
        let mut pipeline = Pipeline::new(Arc::clone(&book), gen);

        assert!(pipeline.ingest(order(100.0, 1_725_000_000)).unwrap().is_none());
        assert!(pipeline.ingest(order(101.0, 1_725_000_030)).unwrap().is_none());

        let candle = pipeline
            .ingest(order(102.0, 1_725_000_065))
            .unwrap()
            .expect("first window closed");
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.close, 101.0);

        // The closing order starts the next window rather than vanishing.
        let tail = pipeline.finish().unwrap().expect("final window closed");
        assert_eq!(tail.open, 102.0);
        assert_eq!(pipeline.candles_emitted(), 2);
        assert_eq!(book.len(), 3);
    }

    #[test]
    fn finish_on_empty_pipeline_is_a_noop() {
        let book = Arc::new(OrderBook::new());
        let gen = Arc::new(CandlestickGenerator::new(60));
        let mut pipeline = Pipeline::new(book, gen);
        assert!(pipeline.finish().unwrap().is_none());
    }
}
