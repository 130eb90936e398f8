//! # Tickforge Feed
//!
//! Multi-transport order ingestion.
//!
//! Each [`FeedSource`] reads raw bytes from one transport (CSV file, shared
//! memory ring, TCP socket, JSON injection file), validates and parses them
//! into [`Order`](tickforge_types::Order)s tagged with provenance
//! [`AuthFlags`](tickforge_types::AuthFlags), hashes payloads into the
//! [`IntegrityLog`], and pushes [`FeedEvent`]s onto one bounded shared queue.
//!
//! The [`FeedManager`] owns source lifecycle: idempotent start via a status
//! CAS, cooperative stop flags, join-with-deadline shutdown, restart resets
//! and completion tracking. Per-source [`FeedTelemetry`] counters are the
//! observable evidence of soft failures: malformed payloads never stop a run.

pub mod csv;
pub mod error;
pub mod injector;
pub mod integrity;
pub mod manager;
pub mod ring;
pub mod shm;
pub mod socket;
pub mod source;
pub mod telemetry;

pub use csv::CsvFeedSource;
pub use error::FeedError;
pub use injector::InjectorFeedSource;
pub use integrity::{sha256_hex, IntegrityLog};
pub use manager::{FeedManager, SourceId};
pub use ring::{RingBuffer, PACKET_DATA_SIZE};
pub use shm::ShmFeedSource;
pub use socket::SocketFeedSource;
pub use source::{FeedSource, FeedStatus, SourceState};
pub use telemetry::{FeedStamina, FeedTelemetry};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Deserialize;
use tickforge_types::{AuthFlags, Order};

/// One parsed order plus the provenance its transport assigned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedEvent {
    /// The validated order
    pub order: Order,
    /// Transport trust label
    pub auth: AuthFlags,
}

/// Sending half of the shared order queue.
pub type FeedSender = Sender<FeedEvent>;
/// Receiving half of the shared order queue.
pub type FeedReceiver = Receiver<FeedEvent>;

/// Bounded shared order queue; all sources push into one of these.
pub fn order_queue(bound: usize) -> (FeedSender, FeedReceiver) {
    bounded(bound)
}

/// JSON line payload shared by the socket and injector protocols.
#[derive(Debug, Deserialize)]
pub(crate) struct OrderPayload {
    pub price: f64,
    pub amount: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthFlags>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// Push one event, counting a dropped packet when the queue is full.
///
/// Returns false when the consumer side is gone and the run should end.
pub(crate) fn push_event(
    tx: &FeedSender,
    telemetry: &FeedTelemetry,
    event: FeedEvent,
) -> bool {
    match tx.try_send(event) {
        Ok(()) => {
            telemetry.orders_received.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            true
        }
        Err(TrySendError::Full(_)) => {
            telemetry.dropped_packets.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}
