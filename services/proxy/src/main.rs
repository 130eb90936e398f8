//! Tickforge proxy binary: listener loop, backpressure and signal-driven
//! shutdown. Exit code 0 on graceful shutdown, 1 on fatal configuration or
//! bind errors.

use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};

use tickforge_proxy::config::{Args, ProxyConfig};
use tickforge_proxy::conn::ConnectionRegistry;
use tickforge_proxy::net::{self, PollState};

/// Adaptive backpressure ceiling when the connection table is nearly full.
const MAX_BACKPRESSURE_MS: u64 = 50;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let verbose = args.verbose;
    let cfg = match ProxyConfig::validate(args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[FATAL] {e}");
            std::process::exit(1);
        }
    };
    if verbose {
        info!(?cfg, "configuration");
    }

    install_signal_handlers();

    let listen_fd = match net::listen_on(
        &cfg.listen_host,
        cfg.listen_port,
        cfg.max_connections as i32,
        cfg.v6_only,
    ) {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!(
                "[FATAL] failed to bind {}:{}: {e}",
                cfg.listen_host, cfg.listen_port
            );
            std::process::exit(1);
        }
    };
    info!(
        host = %cfg.listen_host,
        port = cfg.listen_port,
        upstream = %format!("{}:{}", cfg.upstream_host, cfg.upstream_port),
        latency_ms = cfg.latency_ms,
        jitter_ms = cfg.jitter_ms,
        drop_rate = cfg.drop_rate,
        dup_rate = cfg.dup_rate,
        bandwidth_kbps = cfg.bandwidth_kbps,
        "proxy listening"
    );

    let running = Arc::new(AtomicBool::new(true));
    let mut registry = ConnectionRegistry::start(Arc::clone(&running));
    let backpressure_ms = AtomicU64::new(0);

    while RUNNING.load(Ordering::SeqCst) {
        match net::poll_fd(listen_fd, libc::POLLIN, 100) {
            PollState::Timeout => continue,
            PollState::Error => {
                if !RUNNING.load(Ordering::SeqCst) {
                    break;
                }
                error!("listener poll failed");
                break;
            }
            PollState::Ready | PollState::Hup => {}
        }

        let client = match net::accept_client(listen_fd) {
            Ok(client) => client,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if !RUNNING.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let active = registry.active();
        if active >= cfg.max_connections {
            warn!(active, "max connections reached, rejecting client");
            reject_overloaded(&client, &cfg);
            continue;
        }

        // Adaptive backpressure: ramp the pre-accept sleep as the table
        // approaches the cap, decay it while there is headroom.
        let sleep_ms = if active + 4 >= cfg.max_connections {
            let next = (backpressure_ms.load(Ordering::Relaxed) + 5).min(MAX_BACKPRESSURE_MS);
            backpressure_ms.store(next, Ordering::Relaxed);
            next
        } else {
            let cur = backpressure_ms.load(Ordering::Relaxed);
            if cur > 0 {
                backpressure_ms.store(cur - 1, Ordering::Relaxed);
            }
            0
        };
        if sleep_ms > 0 {
            debug!(sleep_ms, active, "accept backpressure");
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }

        let _ = client.set_read_timeout(Some(Duration::from_secs(cfg.socket_timeout_sec)));
        let _ = client.set_write_timeout(Some(Duration::from_secs(cfg.socket_timeout_sec)));
        let _ = client.set_nodelay(true);

        registry.spawn(client, cfg.clone());
    }

    info!("shutting down");
    net::close_fd(listen_fd);
    running.store(false, Ordering::Release);
    registry.join_all();
    info!("proxy shutdown complete");
}

/// Turn away a client that exceeds the connection cap.
fn reject_overloaded(client: &TcpStream, cfg: &ProxyConfig) {
    if cfg.http_friendly_errors {
        let mut peek_buf = [0u8; 8];
        std::thread::sleep(Duration::from_millis(20));
        let peeked = net::peek(client.as_raw_fd(), &mut peek_buf);
        if peeked > 0 && net::looks_like_http(&peek_buf[..peeked as usize]) {
            net::send_http_error(
                client.as_raw_fd(),
                "429 Too Many Requests",
                "Too Many Requests",
            );
            return;
        }
    }
    net::set_linger_rst(client);
}
