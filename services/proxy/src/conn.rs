//! Per-connection lifecycle: upstream dial, forwarder threads, idle
//! monitoring, teardown policy, and the finished-thread sweeper.

use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::net;
use crate::pipe::{Forwarder, PipeResult, PipeStats};
use crate::throttle::TokenBucket;

/// Sweep interval of the cleanup thread.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// One tracked connection-handler thread.
struct ConnThread {
    handle: JoinHandle<()>,
    done: Arc<AtomicBool>,
}

/// Registry of live connection threads plus the periodic sweeper.
pub struct ConnectionRegistry {
    threads: Arc<Mutex<Vec<ConnThread>>>,
    sweeper: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl ConnectionRegistry {
    /// Registry with its sweeper thread started.
    pub fn start(running: Arc<AtomicBool>) -> Self {
        let threads: Arc<Mutex<Vec<ConnThread>>> = Arc::new(Mutex::new(Vec::new()));
        let sweeper_threads = Arc::clone(&threads);
        let sweeper_running = Arc::clone(&running);
        let sweeper = std::thread::Builder::new()
            .name("conn-sweeper".into())
            .spawn(move || {
                while sweeper_running.load(Ordering::Acquire) {
                    std::thread::sleep(SWEEP_INTERVAL);
                    let mut threads = sweeper_threads.lock();
                    let mut kept = Vec::with_capacity(threads.len());
                    for entry in threads.drain(..) {
                        if entry.done.load(Ordering::Acquire) {
                            let _ = entry.handle.join();
                        } else {
                            kept.push(entry);
                        }
                    }
                    *threads = kept;
                }
            })
            .expect("spawning connection sweeper");
        Self {
            threads,
            sweeper: Some(sweeper),
            running,
        }
    }

    /// Live connection count.
    pub fn active(&self) -> usize {
        self.threads.lock().len()
    }

    /// Run `handle_connection` for `client` on its own thread.
    pub fn spawn(&self, client: TcpStream, cfg: ProxyConfig) {
        let done = Arc::new(AtomicBool::new(false));
        let thread_done = Arc::clone(&done);
        let handle = std::thread::Builder::new()
            .name("proxy-conn".into())
            .spawn(move || {
                handle_connection(client, &cfg);
                thread_done.store(true, Ordering::Release);
            })
            .expect("spawning connection handler");
        self.threads.lock().push(ConnThread { handle, done });
    }

    /// Join every remaining connection thread (shutdown path).
    pub fn join_all(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            self.running.store(false, Ordering::Release);
            let _ = sweeper.join();
        }
        let mut threads = self.threads.lock();
        for entry in threads.drain(..) {
            let _ = entry.handle.join();
        }
    }
}

/// Handle one accepted client for its whole lifetime.
pub fn handle_connection(client: TcpStream, cfg: &ProxyConfig) {
    let peer = client
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    debug!(peer = %peer, upstream = %cfg.upstream_host, port = cfg.upstream_port, "connection accepted");

    let upstream = match net::dial(
        &cfg.upstream_host,
        cfg.upstream_port,
        Duration::from_secs(cfg.socket_timeout_sec),
    ) {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(peer = %peer, error = %e, "upstream dial failed");
            reject_client(&client, cfg);
            return;
        }
    };

    let _ = client.set_nodelay(true);
    let _ = upstream.set_nodelay(true);

    let client_fd = client.as_raw_fd();
    let upstream_fd = upstream.as_raw_fd();

    // Disabled directions propagate EOF immediately instead of forwarding.
    if !cfg.direction.up_enabled() {
        net::shutdown_write(upstream_fd);
    }
    if !cfg.direction.down_enabled() {
        net::shutdown_write(client_fd);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let epoch = Instant::now();
    let up_stats = Arc::new(PipeStats::default());
    let down_stats = Arc::new(PipeStats::default());
    let up_result = Arc::new(Mutex::new(PipeResult::Success));
    let down_result = Arc::new(Mutex::new(PipeResult::Success));

    let mut forwarders = Vec::new();
    if cfg.direction.up_enabled() {
        forwarders.push(spawn_forwarder(
            "up",
            client_fd,
            upstream_fd,
            cfg,
            Arc::clone(&stop),
            Arc::clone(&up_stats),
            Arc::clone(&up_result),
            epoch,
        ));
    }
    if cfg.direction.down_enabled() {
        forwarders.push(spawn_forwarder(
            "down",
            upstream_fd,
            client_fd,
            cfg,
            Arc::clone(&stop),
            Arc::clone(&down_stats),
            Arc::clone(&down_result),
            epoch,
        ));
    }

    monitor_idle(cfg, &stop, epoch, &up_stats, &down_stats);

    // Teardown: raise the flag, unblock the forwarders, join, then close
    // with the configured policy.
    stop.store(true, Ordering::Release);
    net::shutdown_both(client_fd);
    net::shutdown_both(upstream_fd);
    for handle in forwarders {
        let _ = handle.join();
    }

    let up_outcome = *up_result.lock();
    let down_outcome = *down_result.lock();
    let errored = up_outcome == PipeResult::Error || down_outcome == PipeResult::Error;
    if errored && cfg.rst_on_midstream_errors {
        net::set_linger_rst(&client);
        net::set_linger_rst(&upstream);
    }

    log_summary(&peer, epoch, &up_stats, &down_stats);
    // Sockets close on drop, honoring any linger policy set above.
}

#[allow(clippy::too_many_arguments)]
fn spawn_forwarder(
    label: &'static str,
    from_fd: i32,
    to_fd: i32,
    cfg: &ProxyConfig,
    stop: Arc<AtomicBool>,
    stats: Arc<PipeStats>,
    result_slot: Arc<Mutex<PipeResult>>,
    epoch: Instant,
) -> JoinHandle<()> {
    let throttle = (cfg.rate_bytes_per_sec() > 0).then(|| {
        TokenBucket::new(cfg.rate_bytes_per_sec(), cfg.enable_burst, cfg.burst_seconds)
    });
    let rng = connection_rng(cfg.seed, from_fd, to_fd);
    let cfg = cfg.clone();
    let thread_stop = Arc::clone(&stop);
    std::thread::Builder::new()
        .name(format!("pipe-{label}"))
        .spawn(move || {
            let forwarder = Forwarder {
                from_fd,
                to_fd,
                cfg,
                stop: Arc::clone(&thread_stop),
                stats,
                rng,
                throttle,
                epoch,
                label,
            };
            let result = forwarder.run();
            *result_slot.lock() = result;
            // Either direction ending ends the connection.
            thread_stop.store(true, Ordering::Release);
        })
        .expect("spawning forwarder")
}

/// Seed each direction from the global seed and the two descriptors: runs
/// with the same seed are statistically similar without being bit-identical.
fn connection_rng(seed: u32, from_fd: i32, to_fd: i32) -> StdRng {
    if seed == 0 {
        StdRng::from_entropy()
    } else {
        let mixed = seed ^ from_fd as u32 ^ to_fd as u32;
        StdRng::seed_from_u64(mixed as u64)
    }
}

/// Block until either forwarder stops or the connection idles out.
fn monitor_idle(
    cfg: &ProxyConfig,
    stop: &AtomicBool,
    epoch: Instant,
    up: &PipeStats,
    down: &PipeStats,
) {
    let idle_limit = Duration::from_secs(cfg.idle_timeout_sec);
    while !stop.load(Ordering::Acquire) {
        let newest_us = up.last_activity_us().max(down.last_activity_us());
        let idle = epoch.elapsed().saturating_sub(Duration::from_micros(newest_us));
        if idle > idle_limit {
            warn!(idle_secs = idle.as_secs(), "idle timeout, forcing close");
            stop.store(true, Ordering::Release);
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Close a client we could not serve, honoring the HTTP-friendly and RST
/// policies.
fn reject_client(client: &TcpStream, cfg: &ProxyConfig) {
    let fd = client.as_raw_fd();
    if cfg.http_friendly_errors {
        // Give the client a moment to send its first bytes, then peek.
        let _ = client.set_read_timeout(Some(Duration::from_millis(100)));
        std::thread::sleep(Duration::from_millis(20));
        let mut peek_buf = [0u8; 8];
        let peeked = net::peek(fd, &mut peek_buf);
        if peeked > 0 && net::looks_like_http(&peek_buf[..peeked as usize]) {
            net::send_http_error(fd, "503 Service Unavailable", "Service Unavailable");
            net::shutdown_write(fd);
            drain_briefly(client);
            return; // graceful close on drop
        }
    }
    if cfg.rst_on_upstream_connect_fail {
        net::set_linger_rst(client);
    }
}

/// Read and discard whatever the peer still has in flight, briefly.
fn drain_briefly(client: &TcpStream) {
    use std::io::Read;
    let _ = client.set_read_timeout(Some(Duration::from_millis(200)));
    let mut sink = [0u8; 1024];
    let mut stream = client;
    while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
}

fn log_summary(peer: &str, epoch: Instant, up: &PipeStats, down: &PipeStats) {
    let elapsed = epoch.elapsed().as_secs_f64();
    let sent = up.bytes_sent.load(Ordering::Relaxed) + down.bytes_sent.load(Ordering::Relaxed);
    let received =
        up.bytes_received.load(Ordering::Relaxed) + down.bytes_received.load(Ordering::Relaxed);
    let dropped =
        up.packets_dropped.load(Ordering::Relaxed) + down.packets_dropped.load(Ordering::Relaxed);
    let duplicated = up.packets_duplicated.load(Ordering::Relaxed)
        + down.packets_duplicated.load(Ordering::Relaxed);
    let kbps = if elapsed > 0.0 {
        (sent as f64 * 8.0) / (elapsed * 1000.0)
    } else {
        0.0
    };
    info!(
        peer = %peer,
        bytes_sent = sent,
        bytes_received = received,
        dropped,
        duplicated,
        avg_kbps = %format!("{kbps:.1}"),
        "connection closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn seeded_rng_mixes_descriptors() {
        use rand::Rng;
        let mut a = connection_rng(42, 7, 9);
        let mut b = connection_rng(42, 7, 9);
        let mut c = connection_rng(42, 8, 9);
        let va: u64 = a.gen();
        assert_eq!(va, b.gen::<u64>());
        assert_ne!(va, c.gen::<u64>());
    }

    #[test]
    fn registry_sweeps_finished_connections() {
        let running = Arc::new(AtomicBool::new(true));
        let mut registry = ConnectionRegistry::start(Arc::clone(&running));

        // Fake a finished connection thread via the public pieces: spawn a
        // trivial handler against a loopback pair.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (_server_side, _) = listener.accept().unwrap();

        let cfg = crate::config::ProxyConfig::validate(crate::config::Args::parse_from([
            "tickforge-proxy",
            "--upstream-port",
            "1", // nothing listens there; the handler fails fast and exits
            "--socket-timeout-sec",
            "1",
        ]))
        .unwrap();
        registry.spawn(client, cfg);

        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.active() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(registry.active(), 0);
        registry.join_all();
    }
}
