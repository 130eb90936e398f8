//! Line-oriented CSV file source

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, trace};

use tickforge_types::{AuthFlags, Order};

use crate::error::FeedError;
use crate::integrity::{sha256_hex, IntegrityLog};
use crate::source::{FeedSource, SourceState};
use crate::telemetry::FeedTelemetry;
use crate::{push_event, FeedEvent, FeedSender};

/// Reads `price,amount,timestamp` lines from a file.
///
/// A line is rejected (counting an anomaly) on any of: non-printable bytes,
/// wrong field count, unparseable or non-finite or non-positive numbers, or a
/// timestamp that is not strictly greater than the previous accepted one in
/// this run. The monotonic-timestamp rule defends against out-of-order
/// replay.
pub struct CsvFeedSource {
    path: PathBuf,
    tick_delay: Duration,
    state: SourceState,
    telemetry: Arc<FeedTelemetry>,
    tx: FeedSender,
    integrity: Option<Arc<IntegrityLog>>,
    reader: Mutex<Option<BufReader<File>>>,
}

impl CsvFeedSource {
    /// Source over `path`, pushing into `tx`.
    ///
    /// `tick_delay` throttles replay speed; zero replays as fast as the file
    /// reads.
    pub fn new(
        path: impl Into<PathBuf>,
        tick_delay: Duration,
        telemetry: Arc<FeedTelemetry>,
        tx: FeedSender,
    ) -> Self {
        Self {
            path: path.into(),
            tick_delay,
            state: SourceState::new(),
            telemetry,
            tx,
            integrity: None,
            reader: Mutex::new(None),
        }
    }

    /// Attach the integrity log sink.
    pub fn with_integrity_log(mut self, log: Arc<IntegrityLog>) -> Self {
        self.integrity = Some(log);
        self
    }

    fn parse_line(line: &str) -> Option<(f64, f64, i64)> {
        if line.bytes().any(|b| b < 32 || b > 126) {
            return None;
        }
        let mut fields = line.split(',');
        let (price, amount, ts) = match (fields.next(), fields.next(), fields.next(), fields.next())
        {
            (Some(p), Some(a), Some(t), None) => (p, a, t),
            _ => return None,
        };
        let price: f64 = price.parse().ok()?;
        if !price.is_finite() || price <= 0.0 {
            return None;
        }
        let amount: f64 = amount.parse().ok()?;
        if !amount.is_finite() || amount <= 0.0 {
            return None;
        }
        let ts: i64 = ts.parse().ok()?;
        if ts <= 0 {
            return None;
        }
        Some((price, amount, ts))
    }
}

impl FeedSource for CsvFeedSource {
    fn run(&self) -> Result<(), FeedError> {
        self.state.clear_stop();
        let started = Instant::now();
        self.reset_stream()?;

        let mut reader = self
            .reader
            .lock()
            .take()
            .expect("reset_stream just installed a reader");

        let tag = self.source_tag();
        let mut lines = 0u64;
        let mut last_ts = 0i64;
        let mut buf = Vec::new();

        loop {
            if self.state.stop_requested() {
                break;
            }
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break; // EOF
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            let raw = String::from_utf8_lossy(&buf).into_owned();
            let original_hash = sha256_hex(raw.as_bytes());

            if !self.tick_delay.is_zero() {
                std::thread::sleep(self.tick_delay);
            }

            let Some((price, amount, ts)) = Self::parse_line(&raw) else {
                self.telemetry.count_anomaly();
                continue;
            };

            // Strictly monotonic within a run: replays and reordering are
            // anomalies, not data.
            if ts <= last_ts {
                trace!(ts, last_ts, "stale timestamp rejected");
                self.telemetry.count_anomaly();
                continue;
            }

            let order = match Order::new(price, amount, ts) {
                Ok(order) => order,
                Err(_) => {
                    self.telemetry.count_anomaly();
                    continue;
                }
            };
            last_ts = ts;

            if let Some(log) = &self.integrity {
                let parsed_hash = sha256_hex(order.to_feed_line().as_bytes());
                if parsed_hash != original_hash {
                    log.log_anomaly(&tag, &original_hash, &parsed_hash);
                } else {
                    log.log_packet(&tag, &raw, &original_hash);
                }
            }

            if !push_event(
                &self.tx,
                &self.telemetry,
                FeedEvent {
                    order,
                    auth: AuthFlags::Trusted,
                },
            ) {
                break; // consumer gone
            }
            lines += 1;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.telemetry.record_run(lines, elapsed_ms);
        info!(tag = %tag, lines, elapsed_ms, "csv feed run finished");
        Ok(())
    }

    fn source_tag(&self) -> String {
        format!("SRC_CSV_{}", self.path.display())
    }

    fn state(&self) -> &SourceState {
        &self.state
    }

    fn reset_stream(&self) -> Result<(), FeedError> {
        let file = File::open(&self.path)?;
        *self.reader.lock() = Some(BufReader::new(file));
        Ok(())
    }

    fn telemetry(&self) -> Option<&FeedTelemetry> {
        Some(&self.telemetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_three_field_lines() {
        assert_eq!(
            CsvFeedSource::parse_line("100.0,1.0,1725621000"),
            Some((100.0, 1.0, 1_725_621_000))
        );
    }

    #[test]
    fn rejects_wrong_field_counts_and_separators() {
        assert_eq!(CsvFeedSource::parse_line("INVALID"), None);
        assert_eq!(CsvFeedSource::parse_line("100.0;1.0;1725621003"), None);
        assert_eq!(CsvFeedSource::parse_line("1.0,2.0,3,4"), None);
        assert_eq!(CsvFeedSource::parse_line("1.0,2.0"), None);
    }

    #[test]
    fn rejects_non_finite_and_non_positive_numbers() {
        assert_eq!(CsvFeedSource::parse_line("NaN,1.0,1725621000"), None);
        assert_eq!(CsvFeedSource::parse_line("inf,1.0,1725621000"), None);
        assert_eq!(CsvFeedSource::parse_line("-1.0,1.0,1725621000"), None);
        assert_eq!(CsvFeedSource::parse_line("100.0,0,1725621000"), None);
        assert_eq!(CsvFeedSource::parse_line("100.0,1.0,-5"), None);
    }

    #[test]
    fn rejects_trailing_garbage_in_fields() {
        assert_eq!(CsvFeedSource::parse_line("100.0x,1.0,1725621000"), None);
        assert_eq!(CsvFeedSource::parse_line("100.0,1.0,1725621000z"), None);
    }

    #[test]
    fn rejects_non_printable_bytes() {
        assert_eq!(CsvFeedSource::parse_line("100.0,1.0,17256\x0121000"), None);
        assert_eq!(CsvFeedSource::parse_line("100.0,1.0,1725621000\r"), None);
    }
}
