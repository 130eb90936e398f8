//! Tickforge engine binary: wires feed sources, the order book, the
//! candlestick generator and the indicator registry into one process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing::{error, info};

use tickforge_book::OrderBook;
use tickforge_engine::{
    fatal, BollingerBands, CandlestickGenerator, EngineError, IndicatorRegistry, Macd, Pipeline,
    Rsi, Sma, ThreadPool,
};
use tickforge_feed::{
    order_queue, CsvFeedSource, FeedManager, FeedSource, FeedTelemetry, InjectorFeedSource,
    IntegrityLog, RingBuffer, ShmFeedSource, SocketFeedSource,
};

#[derive(Debug, Parser)]
#[command(name = "tickforge-engine", about = "Real-time market-data ingestion and analytics")]
struct Args {
    /// CSV feed files (repeatable)
    #[arg(long = "csv")]
    csv: Vec<PathBuf>,

    /// JSON injection feed file
    #[arg(long)]
    inject: Option<PathBuf>,

    /// Listen address for the socket feed
    #[arg(long)]
    socket: Option<SocketAddr>,

    /// Backing file of a shared-memory feed ring to attach
    #[arg(long)]
    shm: Option<PathBuf>,

    /// Slot capacity of the shared-memory ring
    #[arg(long, default_value_t = 1024)]
    shm_capacity: u32,

    /// Candlestick window duration in seconds
    #[arg(long, default_value_t = 60)]
    window_secs: i64,

    /// Bound of the shared order queue
    #[arg(long, default_value_t = 4096)]
    queue_bound: usize,

    /// Arena slot capacity of the order book
    #[arg(long, default_value_t = 4096)]
    book_capacity: usize,

    /// Per-line replay delay for CSV feeds, milliseconds
    #[arg(long, default_value_t = 0)]
    tick_delay_ms: u64,

    /// RSI period
    #[arg(long, default_value_t = 14)]
    rsi_period: usize,

    /// SMA period
    #[arg(long, default_value_t = 20)]
    sma_period: usize,

    /// Start at most one source per tag
    #[arg(long)]
    unique_tags: bool,

    /// Integrity log path (defaults to logs/feed_hash.log)
    #[arg(long)]
    integrity_log: Option<PathBuf>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run() {
        fatal::abort_with_dump(&format!("{e:#}"));
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    install_signal_handlers();

    let integrity = Arc::new(match &args.integrity_log {
        Some(path) => IntegrityLog::at_path(path)
            .with_context(|| format!("opening integrity log {}", path.display()))?,
        None => IntegrityLog::open_default().context("opening logs/feed_hash.log")?,
    });

    let (tx, rx) = order_queue(args.queue_bound);
    let manager = FeedManager::new();
    let mut telemetries: Vec<(String, Arc<FeedTelemetry>)> = Vec::new();

    for path in &args.csv {
        let telemetry = Arc::new(FeedTelemetry::new());
        let source = CsvFeedSource::new(
            path,
            Duration::from_millis(args.tick_delay_ms),
            Arc::clone(&telemetry),
            tx.clone(),
        )
        .with_integrity_log(Arc::clone(&integrity));
        telemetries.push((source.source_tag(), telemetry));
        manager.add_source(Arc::new(source));
    }
    if let Some(path) = &args.inject {
        let telemetry = Arc::new(FeedTelemetry::new());
        let source = InjectorFeedSource::new(path, Arc::clone(&telemetry), tx.clone())
            .with_integrity_log(Arc::clone(&integrity));
        telemetries.push((source.source_tag(), telemetry));
        manager.add_source(Arc::new(source));
    }
    if let Some(addr) = &args.socket {
        let telemetry = Arc::new(FeedTelemetry::new());
        let source = SocketFeedSource::bind(*addr, Arc::clone(&telemetry), tx.clone())
            .with_context(|| format!("binding socket feed on {addr}"))?;
        telemetries.push((source.source_tag(), telemetry));
        manager.add_source(Arc::new(source));
    }
    if let Some(path) = &args.shm {
        let telemetry = Arc::new(FeedTelemetry::new());
        let ring = RingBuffer::open(path, args.shm_capacity)
            .with_context(|| format!("attaching shm ring {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ring".into());
        let source = ShmFeedSource::new(name, ring, Arc::clone(&telemetry), tx.clone())
            .with_integrity_log(Arc::clone(&integrity));
        telemetries.push((source.source_tag(), telemetry));
        manager.add_source(Arc::new(source));
    }
    drop(tx); // sources hold the remaining senders

    if manager.source_count() == 0 {
        anyhow::bail!("no feed sources configured; pass --csv, --inject, --socket or --shm");
    }

    let registry = Arc::new(IndicatorRegistry::new());
    registry.register("rsi", Box::new(Rsi::new(args.rsi_period)?));
    registry.register("sma", Box::new(Sma::new(args.sma_period)?));
    registry.register("macd", Box::new(Macd::standard()));
    registry.register("bollinger", Box::new(BollingerBands::standard()));

    let pool = Arc::new(ThreadPool::with_default_size());
    let book = Arc::new(OrderBook::arena_sized(args.book_capacity));
    let generator = Arc::new(CandlestickGenerator::new(args.window_secs));
    generator.bind_registry(Arc::clone(&registry));
    generator.bind_thread_pool(Arc::clone(&pool));
    generator.set_dispatch(Box::new(|candle| info!(%candle, "candle dispatched")));

    let mut pipeline = Pipeline::new(Arc::clone(&book), Arc::clone(&generator));

    info!(sources = manager.source_count(), window_secs = args.window_secs, "engine starting");
    manager.start_all(args.unique_tags);

    loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            info!("shutdown requested");
            manager.stop_all()?;
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => match pipeline.ingest(event.order) {
                Ok(_) => {}
                Err(e @ EngineError::VolumeOverflow { .. }) => {
                    // Fatal for the window, not for the process.
                    error!(error = %e, "window flush failed");
                }
                Err(e) => return Err(e.into()),
            },
            Err(RecvTimeoutError::Timeout) => {
                if manager.wait_for_completion(Duration::ZERO) && rx.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(candle) = pipeline.finish()? {
        info!(%candle, "final window flushed");
    }
    let candles_emitted = pipeline.candles_emitted();
    // Release every pool handle so Drop joins the workers and in-flight
    // indicator updates drain before signals are read.
    drop(pipeline);
    drop(generator);
    drop(pool);

    for (name, signal) in registry.current_signals() {
        info!(indicator = %name, signal, "final signal");
    }
    for (tag, telemetry) in &telemetries {
        info!(
            tag = %tag,
            orders = telemetry.orders_received.load(Ordering::Relaxed),
            anomalies = telemetry.anomalies.load(Ordering::Relaxed),
            dropped = telemetry.dropped_packets.load(Ordering::Relaxed),
            "source telemetry"
        );
    }
    info!(
        candles = candles_emitted,
        book_orders = book.len(),
        "engine finished"
    );
    Ok(())
}
