//! Shared-memory ring consumer source

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tickforge_types::{AuthFlags, Order};

use crate::error::FeedError;
use crate::integrity::{sha256_hex, IntegrityLog};
use crate::ring::RingBuffer;
use crate::source::{FeedSource, SourceState};
use crate::telemetry::FeedTelemetry;
use crate::{push_event, FeedEvent, FeedSender};

/// Drain interval between empty-ring checks.
const DRAIN_IDLE: Duration = Duration::from_micros(100);

/// Drains CSV-over-bytes packets from a [`RingBuffer`].
///
/// Each packet is checked for printable ASCII, parsed as
/// `price,amount,timestamp` and enqueued; malformed packets count anomalies
/// and the loop keeps going. The ring's release store of `tail` after every
/// packet is what lets the producer reclaim the slot.
pub struct ShmFeedSource {
    name: String,
    ring: RingBuffer,
    state: SourceState,
    telemetry: Arc<FeedTelemetry>,
    tx: FeedSender,
    integrity: Option<Arc<IntegrityLog>>,
}

impl ShmFeedSource {
    /// Source draining `ring`; `name` only feeds the source tag.
    pub fn new(
        name: impl Into<String>,
        ring: RingBuffer,
        telemetry: Arc<FeedTelemetry>,
        tx: FeedSender,
    ) -> Self {
        Self {
            name: name.into(),
            ring,
            state: SourceState::new(),
            telemetry,
            tx,
            integrity: None,
        }
    }

    /// Attach the integrity log sink.
    pub fn with_integrity_log(mut self, log: Arc<IntegrityLog>) -> Self {
        self.integrity = Some(log);
        self
    }

    fn parse_packet(payload: &[u8]) -> Option<Order> {
        if payload.iter().any(|&b| b < 32 || b > 126) {
            return None;
        }
        let text = std::str::from_utf8(payload).ok()?;
        let mut fields = text.split(',');
        let (price, amount, ts) = match (fields.next(), fields.next(), fields.next(), fields.next())
        {
            (Some(p), Some(a), Some(t), None) => (p, a, t),
            _ => return None,
        };
        let price: f64 = price.parse().ok()?;
        let amount: f64 = amount.parse().ok()?;
        let ts: i64 = ts.parse().ok()?;
        Order::new(price, amount, ts).ok()
    }
}

impl FeedSource for ShmFeedSource {
    fn run(&self) -> Result<(), FeedError> {
        self.state.clear_stop();
        let tag = self.source_tag();
        info!(tag = %tag, capacity = self.ring.capacity(), "shm feed attached");

        'outer: while !self.state.stop_requested() {
            while let Some(payload) = self.ring.try_pop() {
                if let Some(log) = &self.integrity {
                    let text = String::from_utf8_lossy(&payload);
                    log.log_packet(&tag, &text, &sha256_hex(&payload));
                }

                match Self::parse_packet(&payload) {
                    Some(order) => {
                        if !push_event(
                            &self.tx,
                            &self.telemetry,
                            FeedEvent {
                                order,
                                auth: AuthFlags::Trusted,
                            },
                        ) {
                            break 'outer;
                        }
                    }
                    None => self.telemetry.count_anomaly(),
                }

                if self.state.stop_requested() {
                    break 'outer;
                }
            }
            std::thread::sleep(DRAIN_IDLE);
        }
        Ok(())
    }

    fn source_tag(&self) -> String {
        format!("SRC_SHM_{}", self.name)
    }

    fn state(&self) -> &SourceState {
        &self.state
    }

    fn telemetry(&self) -> Option<&FeedTelemetry> {
        Some(&self.telemetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_packets() {
        let o = ShmFeedSource::parse_packet(b"100.0,2.0,1725000001").unwrap();
        assert_eq!(o.price, 100.0);
        assert_eq!(o.amount, 2.0);
    }

    #[test]
    fn rejects_binary_and_malformed_packets() {
        assert!(ShmFeedSource::parse_packet(b"\x00\x01\x02").is_none());
        assert!(ShmFeedSource::parse_packet(b"malformed,packet").is_none());
        assert!(ShmFeedSource::parse_packet(b"1e308,NaN,XYZ").is_none());
        assert!(ShmFeedSource::parse_packet(b"").is_none());
    }
}
