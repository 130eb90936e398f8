//! Line-oriented TCP socket source

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use tickforge_types::{AuthFlags, Order};

use crate::error::FeedError;
use crate::source::{FeedSource, SourceState};
use crate::telemetry::FeedTelemetry;
use crate::{push_event, FeedEvent, FeedSender, OrderPayload};

const READ_BUFFER_SIZE: usize = 4096;
const ACCEPT_IDLE: Duration = Duration::from_millis(100);
const READ_IDLE: Duration = Duration::from_millis(1);

/// Accepts one TCP client at a time and parses newline-delimited JSON orders.
///
/// Partial lines are carried across reads; CRLF is tolerated. A malformed
/// line counts an anomaly. On disconnect the source closes the client and
/// goes back to accepting.
pub struct SocketFeedSource {
    addr: SocketAddr,
    listener: TcpListener,
    client: Mutex<Option<TcpStream>>,
    state: SourceState,
    telemetry: Arc<FeedTelemetry>,
    tx: FeedSender,
}

impl SocketFeedSource {
    /// Bind the listening socket immediately; accepting happens in `run`.
    pub fn bind(
        addr: SocketAddr,
        telemetry: Arc<FeedTelemetry>,
        tx: FeedSender,
    ) -> Result<Self, FeedError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        Ok(Self {
            addr,
            listener,
            client: Mutex::new(None),
            state: SourceState::new(),
            telemetry,
            tx,
        })
    }

    /// Actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn parse_line(line: &str) -> Option<FeedEvent> {
        let payload: OrderPayload = serde_json::from_str(line).ok()?;
        let order = Order::new(payload.price, payload.amount, payload.timestamp).ok()?;
        Some(FeedEvent {
            order,
            auth: payload.auth.unwrap_or(AuthFlags::Trusted),
        })
    }

    /// Split `pending` on newlines and enqueue every complete line.
    ///
    /// Returns false when the queue consumer is gone.
    fn drain_lines(&self, pending: &mut String) -> bool {
        while let Some(pos) = pending.find('\n') {
            let mut line: String = pending.drain(..=pos).collect();
            line.pop(); // trailing \n
            if line.ends_with('\r') {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            match Self::parse_line(&line) {
                Some(event) => {
                    if !push_event(&self.tx, &self.telemetry, event) {
                        return false;
                    }
                }
                None => self.telemetry.count_anomaly(),
            }
        }
        true
    }
}

impl FeedSource for SocketFeedSource {
    fn run(&self) -> Result<(), FeedError> {
        self.state.clear_stop();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut pending = String::new();
        info!(addr = %self.addr, "socket feed listening");

        while !self.state.stop_requested() {
            let connected = self.client.lock().is_some();
            if !connected {
                match self.listener.accept() {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "socket feed client connected");
                        stream.set_nonblocking(true)?;
                        pending.clear();
                        *self.client.lock() = Some(stream);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(ACCEPT_IDLE);
                        continue;
                    }
                    Err(_) => {
                        std::thread::sleep(ACCEPT_IDLE);
                        continue;
                    }
                }
            }

            let read = {
                let mut guard = self.client.lock();
                match guard.as_mut() {
                    Some(stream) => stream.read(&mut buf),
                    None => continue, // reset_stream raced us
                }
            };

            match read {
                Ok(0) => {
                    debug!("socket feed client disconnected");
                    *self.client.lock() = None;
                    std::thread::sleep(ACCEPT_IDLE);
                }
                Ok(n) => {
                    pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if !self.drain_lines(&mut pending) {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(READ_IDLE);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => {
                    *self.client.lock() = None;
                    std::thread::sleep(ACCEPT_IDLE);
                }
            }
        }
        Ok(())
    }

    fn source_tag(&self) -> String {
        format!("SRC_SOCKET_{}", self.addr)
    }

    fn state(&self) -> &SourceState {
        &self.state
    }

    fn reset_stream(&self) -> Result<(), FeedError> {
        // Drop any connected client; the listener stays bound.
        *self.client.lock() = None;
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
    fn parses_minimal_json_order() {
        let event =
            SocketFeedSource::parse_line(r#"{"price":101.5,"amount":2.0,"timestamp":1725000001}"#)
                .unwrap();
        assert_eq!(event.order.price, 101.5);
        assert_eq!(event.auth, AuthFlags::Trusted);
    }

    #[test]
    fn honors_auth_field() {
        let event = SocketFeedSource::parse_line(
            r#"{"price":101.5,"amount":2.0,"timestamp":1725000001,"auth":"SUSPICIOUS"}"#,
        )
        .unwrap();
        assert_eq!(event.auth, AuthFlags::Suspicious);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(SocketFeedSource::parse_line("not json").is_none());
        assert!(SocketFeedSource::parse_line(r#"{"price":101.5}"#).is_none());
        assert!(
            SocketFeedSource::parse_line(r#"{"price":-1,"amount":2.0,"timestamp":1725000001}"#)
                .is_none()
        );
    }
}
