//! Standalone producer that fills a shared-memory feed ring with synthetic
//! packets, optionally injecting malformed payloads for resilience testing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use tracing::{info, warn};

use tickforge_feed::{RingBuffer, PACKET_DATA_SIZE};

#[derive(Debug, Parser)]
#[command(name = "shm-feed-writer", about = "Synthetic shared-memory feed producer")]
struct Args {
    /// Backing file of the ring (create it fresh)
    #[arg(long, default_value = "/dev/shm/tickforge_feed_ring")]
    shm_path: PathBuf,

    /// Ring capacity in slots
    #[arg(long, default_value_t = 1024)]
    capacity: u32,

    /// Milliseconds between packets
    #[arg(long, default_value_t = 50)]
    rate_ms: u64,

    /// Total packets to write
    #[arg(long, default_value_t = 100)]
    count: u32,

    /// Inject a malformed packet every fifth write
    #[arg(long)]
    malformed: bool,

    /// Write as fast as the ring accepts, ignoring --rate-ms
    #[arg(long)]
    burst: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let ring = RingBuffer::create(&args.shm_path, args.capacity)
        .with_context(|| format!("creating ring at {}", args.shm_path.display()))?;
    info!(path = %args.shm_path.display(), capacity = args.capacity, "ring created");

    let mut rng = rand::thread_rng();
    let malformed_pool: [&[u8]; 4] = [
        b"",
        b"malformed,packet",
        b"1e308,NaN,XYZ",
        &[b'X'; PACKET_DATA_SIZE],
    ];

    let mut written = 0u32;
    while written < args.count {
        let payload: Vec<u8> = if args.malformed && written % 5 == 0 {
            malformed_pool[rng.gen_range(0..malformed_pool.len())].to_vec()
        } else {
            format!(
                "100.{},{}.0,{}",
                written % 100,
                written % 9 + 1,
                1_725_000_000 + written as i64
            )
            .into_bytes()
        };

        if ring.try_push(&payload) {
            written += 1;
            if !args.burst {
                std::thread::sleep(Duration::from_millis(args.rate_ms));
            }
        } else {
            warn!("ring full, backing off");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    info!(written, "done");
    Ok(())
}
