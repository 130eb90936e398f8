//! JSON injection file source

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use tickforge_types::{AuthFlags, Order};

use crate::error::FeedError;
use crate::integrity::{sha256_hex, IntegrityLog};
use crate::source::{FeedSource, SourceState};
use crate::telemetry::FeedTelemetry;
use crate::{push_event, FeedEvent, FeedSender, OrderPayload};

/// Replays a file of one-JSON-object-per-line payloads.
///
/// Required fields `{price, amount, timestamp}`; optional `{tag, auth,
/// delay_ms}`. The per-record delay is honored before enqueueing, and every
/// record's raw hash is verified against the canonical serialization of the
/// parsed order — a mismatch goes to the integrity log as an anomaly line.
pub struct InjectorFeedSource {
    path: PathBuf,
    state: SourceState,
    telemetry: Arc<FeedTelemetry>,
    tx: FeedSender,
    integrity: Option<Arc<IntegrityLog>>,
    reader: Mutex<Option<BufReader<File>>>,
}

impl InjectorFeedSource {
    /// Source replaying `path` into `tx`.
    pub fn new(path: impl Into<PathBuf>, telemetry: Arc<FeedTelemetry>, tx: FeedSender) -> Self {
        Self {
            path: path.into(),
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
}

impl FeedSource for InjectorFeedSource {
    fn run(&self) -> Result<(), FeedError> {
        self.state.clear_stop();
        self.reset_stream()?;

        let mut reader = self
            .reader
            .lock()
            .take()
            .expect("reset_stream just installed a reader");
        let tag = self.source_tag();

        for line in reader.by_ref().lines() {
            if self.state.stop_requested() {
                break;
            }
            let line = match line {
                Ok(line) => line,
                // Non-UTF-8 payload lines are anomalies, not run failures.
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    self.telemetry.count_anomaly();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if line.trim().is_empty() {
                continue;
            }

            let payload: OrderPayload = match serde_json::from_str(&line) {
                Ok(payload) => payload,
                Err(_) => {
                    self.telemetry.count_anomaly();
                    continue;
                }
            };
            let order = match Order::new(payload.price, payload.amount, payload.timestamp) {
                Ok(order) => order,
                Err(_) => {
                    self.telemetry.count_anomaly();
                    continue;
                }
            };

            if let Some(delay_ms) = payload.delay_ms.filter(|&d| d > 0) {
                std::thread::sleep(Duration::from_millis(delay_ms));
            }

            if let Some(log) = &self.integrity {
                let original_hash = sha256_hex(line.as_bytes());
                let parsed_hash = sha256_hex(order.to_feed_line().as_bytes());
                if original_hash != parsed_hash {
                    log.log_anomaly(&tag, &original_hash, &parsed_hash);
                } else {
                    log.log_packet(&tag, &line, &original_hash);
                }
            }

            let auth = payload.auth.unwrap_or(AuthFlags::Trusted);
            if !push_event(&self.tx, &self.telemetry, FeedEvent { order, auth }) {
                break;
            }

            info!(
                tag = payload.tag.as_deref().unwrap_or(""),
                auth = %auth,
                %order,
                "order injected"
            );
        }
        Ok(())
    }

    fn source_tag(&self) -> String {
        "SRC_INJECTOR".to_string()
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
