//! One-direction forwarder with impairment injection.
//!
//! The loop never blocks longer than 100 ms without re-checking its stop
//! flag: reads wait on `poll(POLLIN)`, writes retry `EAGAIN` through
//! `poll(POLLOUT)` and re-check `SO_ERROR` after each writable wake.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::chunk::Chunker;
use crate::config::ProxyConfig;
use crate::net::{self, PollState};
use crate::throttle::TokenBucket;

/// Poll timeout bounding every blocking wait in the forwarder.
const POLL_TIMEOUT_MS: i32 = 100;

/// Outcome of a send or of a whole forwarding run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeResult {
    /// Everything written / source reached EOF
    Success,
    /// Gave up because the stop flag was raised mid-write
    WouldBlock,
    /// Peer closed the connection
    Closed,
    /// Unrecoverable socket error
    Error,
}

/// Per-direction transfer counters.
#[derive(Debug, Default)]
pub struct PipeStats {
    /// Bytes written to the destination
    pub bytes_sent: AtomicU64,
    /// Bytes read from the source
    pub bytes_received: AtomicU64,
    /// Chunks dropped by impairment
    pub packets_dropped: AtomicU64,
    /// Chunks duplicated by impairment
    pub packets_duplicated: AtomicU64,
    /// Microseconds since connection start at the last activity
    pub last_activity_us: AtomicU64,
}

impl PipeStats {
    fn touch(&self, epoch: Instant) {
        self.last_activity_us
            .store(epoch.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    /// Last activity as micros since the connection epoch.
    pub fn last_activity_us(&self) -> u64 {
        self.last_activity_us.load(Ordering::Relaxed)
    }
}

/// Everything one forwarder direction needs.
pub struct Forwarder {
    pub from_fd: RawFd,
    pub to_fd: RawFd,
    pub cfg: ProxyConfig,
    pub stop: Arc<AtomicBool>,
    pub stats: Arc<PipeStats>,
    pub rng: StdRng,
    pub throttle: Option<TokenBucket>,
    /// Connection start, shared by both directions' activity stamps.
    pub epoch: Instant,
    /// Direction label for logs.
    pub label: &'static str,
}

impl Forwarder {
    /// Ferry bytes until EOF, a stop request, or a socket failure.
    pub fn run(mut self) -> PipeResult {
        let mut buf = vec![0u8; self.cfg.buffer_bytes];
        let mut chunker = Chunker::new();
        let impaired = self.cfg.has_impairments();

        loop {
            if self.stop.load(Ordering::Acquire) {
                return PipeResult::WouldBlock;
            }
            match net::poll_fd(self.from_fd, libc::POLLIN, POLL_TIMEOUT_MS) {
                PollState::Timeout => continue,
                PollState::Error => return PipeResult::Error,
                PollState::Ready | PollState::Hup => {}
            }

            // Bound the read by the bandwidth allowance so the socket buffer
            // provides natural backpressure.
            let mut want = buf.len();
            if let Some(throttle) = &self.throttle {
                want = want.min(throttle.allowance(8192));
            }

            let n = net::recv_nonblocking(self.from_fd, &mut buf[..want]);
            if n == 0 {
                // EOF: flush any carried partial line, then propagate.
                if impaired {
                    let flush_ok = self.flush_pending(&mut chunker);
                    if flush_ok != PipeResult::Success {
                        return flush_ok;
                    }
                }
                if self.cfg.half_close {
                    net::shutdown_write(self.to_fd);
                }
                debug!(dir = self.label, "source eof");
                return PipeResult::Success;
            }
            if n < 0 {
                let err = std::io::Error::last_os_error();
                match err.kind() {
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => continue,
                    _ => {
                        warn!(dir = self.label, error = %err, "recv failed");
                        net::shutdown_write(self.to_fd);
                        return PipeResult::Error;
                    }
                }
            }

            let n = n as usize;
            self.stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
            self.stats.touch(self.epoch);

            let result = if impaired {
                self.forward_impaired(&mut chunker, &buf[..n])
            } else {
                self.send_counted(&buf[..n])
            };
            if result != PipeResult::Success {
                net::shutdown_write(self.to_fd);
                return result;
            }
        }
    }

    fn flush_pending(&mut self, chunker: &mut Chunker) -> PipeResult {
        // Split borrows: flush needs &mut chunker while the sender needs
        // &mut self, so drain into a buffer first.
        let mut carried = Vec::new();
        chunker.flush(|chunk| {
            carried.extend_from_slice(chunk);
            true
        });
        if carried.is_empty() {
            return PipeResult::Success;
        }
        self.send_counted(&carried)
    }

    fn send_counted(&mut self, data: &[u8]) -> PipeResult {
        let result = send_all(
            self.to_fd,
            data,
            self.throttle.as_ref(),
            &self.stop,
        );
        if result == PipeResult::Success {
            self.stats.bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
            self.stats.touch(self.epoch);
        }
        result
    }

    fn forward_impaired(&mut self, chunker: &mut Chunker, data: &[u8]) -> PipeResult {
        // Pull the chunk list first; each chunk then goes through the
        // drop/latency/duplicate decision sequence.
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        chunker.process(data, |chunk| {
            chunks.push(chunk.to_vec());
            true
        });

        for chunk in chunks {
            if self.cfg.drop_rate > 0.0 && self.rng.gen_bool(self.cfg.drop_rate) {
                self.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(dir = self.label, len = chunk.len(), "chunk dropped");
                // A dropped packet still observes the path latency.
                self.sleep_latency(1);
                continue;
            }

            self.sleep_latency(1);
            let sent = self.send_counted(&chunk);
            if sent != PipeResult::Success {
                return sent;
            }

            if self.cfg.dup_rate > 0.0 && self.rng.gen_bool(self.cfg.dup_rate) {
                self.stats.packets_duplicated.fetch_add(1, Ordering::Relaxed);
                // Duplicates arrive shortly after the original.
                self.sleep_latency(4);
                let sent = self.send_counted(&chunk);
                if sent != PipeResult::Success {
                    return sent;
                }
            }
        }
        PipeResult::Success
    }

    /// Sleep `latency ± jitter`, scaled down by `divisor`, clamped to the
    /// configured ceiling.
    fn sleep_latency(&mut self, divisor: u64) {
        let base = self.cfg.latency_ms / divisor;
        let jitter_span = self.cfg.jitter_ms / divisor;
        if base == 0 && jitter_span == 0 {
            return;
        }
        let jitter = if jitter_span > 0 {
            self.rng.gen_range(-(jitter_span as i64)..=jitter_span as i64)
        } else {
            0
        };
        let delay = (base as i64 + jitter).max(0) as u64;
        let delay = delay.min(self.cfg.max_latency_ms);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
    }
}

/// Write all of `data`, retrying `EAGAIN` through `POLLOUT`.
///
/// Throttle tokens are consumed only after a successful send. `SO_ERROR` is
/// re-checked after every writable wake so a failed async connect or RST
/// surfaces as `Error` rather than a silent retry loop.
pub fn send_all(
    fd: RawFd,
    data: &[u8],
    throttle: Option<&TokenBucket>,
    stop: &AtomicBool,
) -> PipeResult {
    const CLEAN_BATCH: usize = 1200;

    let mut sent = 0;
    while sent < data.len() {
        if stop.load(Ordering::Acquire) {
            return PipeResult::WouldBlock;
        }

        let mut chunk = (data.len() - sent).min(CLEAN_BATCH);
        if let Some(throttle) = throttle {
            chunk = chunk.min(throttle.bytes_per_100ms().max(1));
            chunk = throttle.allowance(chunk).max(1);
        }

        let n = net::send_nonblocking(fd, &data[sent..sent + chunk]);
        if n > 0 {
            if let Some(throttle) = throttle {
                throttle.consume(n as usize);
            }
            sent += n as usize;
            continue;
        }
        if n == 0 {
            return PipeResult::Closed;
        }

        let err = std::io::Error::last_os_error();
        match err.kind() {
            std::io::ErrorKind::Interrupted => continue,
            std::io::ErrorKind::WouldBlock => {
                match net::poll_fd(fd, libc::POLLOUT, POLL_TIMEOUT_MS) {
                    PollState::Error => return PipeResult::Error,
                    PollState::Hup => return PipeResult::Closed,
                    PollState::Ready | PollState::Timeout => {
                        if let Some(sock_err) = net::socket_error(fd) {
                            warn!(error = %sock_err, "socket error after POLLOUT");
                            return PipeResult::Error;
                        }
                    }
                }
            }
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
                return PipeResult::Closed;
            }
            _ => {
                warn!(error = %err, "send failed");
                return PipeResult::Error;
            }
        }
    }
    PipeResult::Success
}
