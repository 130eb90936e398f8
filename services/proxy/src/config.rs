//! Proxy configuration: CLI surface and validation

use clap::Parser;
use thiserror::Error;

/// Rejections from [`ProxyConfig::validate`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Port outside 1..=65535
    #[error("invalid {name}: {value} (expected 1-65535)")]
    BadPort {
        /// Flag name
        name: &'static str,
        /// Offending value
        value: i64,
    },

    /// Direction string not one of up/down/both
    #[error("invalid --direction {0:?} (expected up|down|both)")]
    BadDirection(String),
}

/// Which directions carry traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream only
    Up,
    /// Upstream to client only
    Down,
    /// Both directions
    Both,
}

impl Direction {
    /// True when client-to-upstream traffic is forwarded.
    pub fn up_enabled(&self) -> bool {
        matches!(self, Direction::Up | Direction::Both)
    }

    /// True when upstream-to-client traffic is forwarded.
    pub fn down_enabled(&self) -> bool {
        matches!(self, Direction::Down | Direction::Both)
    }
}

/// Command-line surface of the proxy.
#[derive(Debug, Parser)]
#[command(
    name = "tickforge-proxy",
    about = "TCP latency-impairment proxy for resilience testing"
)]
pub struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub listen_host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 7001)]
    pub listen_port: i64,

    /// Upstream host to dial per connection
    #[arg(long, default_value = "127.0.0.1")]
    pub upstream_host: String,

    /// Upstream port
    #[arg(long, default_value_t = 7002)]
    pub upstream_port: i64,

    /// Base latency added to each impaired chunk
    #[arg(long, default_value_t = 0)]
    pub latency_ms: i64,

    /// Random jitter around the base latency
    #[arg(long, default_value_t = 0)]
    pub jitter_ms: i64,

    /// Ceiling on latency + jitter per chunk
    #[arg(long, default_value_t = 10_000)]
    pub max_latency_ms: i64,

    /// Probability of dropping a chunk (0.0-1.0)
    #[arg(long, default_value_t = 0.0)]
    pub drop_rate: f64,

    /// Probability of duplicating a chunk (0.0-1.0)
    #[arg(long, default_value_t = 0.0)]
    pub dup_rate: f64,

    /// Bandwidth cap in kilobits per second; 0 disables shaping
    #[arg(long, default_value_t = 0)]
    pub bandwidth_kbps: i64,

    /// Receive buffer size, rounded to a power of two in [1 KiB, 1 MiB]
    #[arg(long, default_value_t = 4096)]
    pub buffer_bytes: usize,

    /// Impaired directions: up, down or both
    #[arg(long, default_value = "both")]
    pub direction: String,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = 128)]
    pub max_connections: usize,

    /// Half-close the peer when one side hits EOF (default)
    #[arg(long, overrides_with = "no_half_close")]
    pub half_close: bool,

    /// Disable half-close propagation
    #[arg(long)]
    pub no_half_close: bool,

    /// Allow the token bucket to accumulate a burst
    #[arg(long)]
    pub enable_burst: bool,

    /// Burst window in seconds (bucket depth = rate * burst)
    #[arg(long, default_value_t = 2.0)]
    pub burst_seconds: f64,

    /// Reply 503/429 to HTTP-looking clients on failure paths
    #[arg(long)]
    pub http_friendly_errors: bool,

    /// RST the client when the upstream dial fails
    #[arg(long)]
    pub rst_on_upstream_connect_fail: bool,

    /// RST instead of graceful close after mid-stream errors
    #[arg(long)]
    pub rst_on_midstream_errors: bool,

    /// Socket timeout (also the upstream connect deadline), seconds
    #[arg(long, default_value_t = 10)]
    pub socket_timeout_sec: i64,

    /// Idle timeout before a connection is force-closed, seconds
    #[arg(long, default_value_t = 300)]
    pub idle_timeout_sec: i64,

    /// Listen IPv6-only instead of dual-stack
    #[arg(long)]
    pub v6_only: bool,

    /// Verbose logging
    #[arg(long, short)]
    pub verbose: bool,

    /// PRNG seed for reproducible impairment patterns; 0 uses entropy
    #[arg(long, default_value_t = 0)]
    pub seed: u32,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub latency_ms: u64,
    pub jitter_ms: u64,
    pub max_latency_ms: u64,
    pub drop_rate: f64,
    pub dup_rate: f64,
    pub bandwidth_kbps: u64,
    pub buffer_bytes: usize,
    pub direction: Direction,
    pub max_connections: usize,
    pub half_close: bool,
    pub enable_burst: bool,
    pub burst_seconds: f64,
    pub http_friendly_errors: bool,
    pub rst_on_upstream_connect_fail: bool,
    pub rst_on_midstream_errors: bool,
    pub socket_timeout_sec: u64,
    pub idle_timeout_sec: u64,
    pub v6_only: bool,
    pub verbose: bool,
    pub seed: u32,
}

impl ProxyConfig {
    /// Validate and normalize parsed arguments.
    ///
    /// Rates are clamped to [0, 1], timeouts to their documented ranges and
    /// the buffer to a power of two in [1 KiB, 1 MiB]; bad ports and
    /// directions are hard errors.
    pub fn validate(args: Args) -> Result<Self, ConfigError> {
        let listen_port = port(args.listen_port, "--listen-port")?;
        let upstream_port = port(args.upstream_port, "--upstream-port")?;
        let direction = match args.direction.as_str() {
            "up" => Direction::Up,
            "down" => Direction::Down,
            "both" => Direction::Both,
            other => return Err(ConfigError::BadDirection(other.to_string())),
        };

        // --no-half-close wins; half-close is otherwise the default.
        let half_close = !args.no_half_close;

        Ok(Self {
            listen_host: args.listen_host,
            listen_port,
            upstream_host: args.upstream_host,
            upstream_port,
            latency_ms: args.latency_ms.max(0) as u64,
            jitter_ms: args.jitter_ms.max(0) as u64,
            max_latency_ms: args.max_latency_ms.max(0) as u64,
            drop_rate: args.drop_rate.clamp(0.0, 1.0),
            dup_rate: args.dup_rate.clamp(0.0, 1.0),
            bandwidth_kbps: args.bandwidth_kbps.max(0) as u64,
            buffer_bytes: normalize_buffer(args.buffer_bytes),
            direction,
            max_connections: args.max_connections.max(1),
            half_close,
            enable_burst: args.enable_burst,
            burst_seconds: if args.burst_seconds.is_finite() && args.burst_seconds > 0.0 {
                args.burst_seconds
            } else {
                1.0
            },
            http_friendly_errors: args.http_friendly_errors,
            rst_on_upstream_connect_fail: args.rst_on_upstream_connect_fail,
            rst_on_midstream_errors: args.rst_on_midstream_errors,
            socket_timeout_sec: args.socket_timeout_sec.clamp(1, 300) as u64,
            idle_timeout_sec: args.idle_timeout_sec.clamp(10, 3600) as u64,
            v6_only: args.v6_only,
            verbose: args.verbose,
            seed: args.seed,
        })
    }

    /// True when the impairment path (latency/drop/dup) is active.
    pub fn has_impairments(&self) -> bool {
        self.latency_ms > 0 || self.jitter_ms > 0 || self.drop_rate > 0.0 || self.dup_rate > 0.0
    }

    /// Bandwidth cap in bytes per second; 0 when shaping is off.
    pub fn rate_bytes_per_sec(&self) -> u64 {
        self.bandwidth_kbps * 1000 / 8
    }
}

fn port(value: i64, name: &'static str) -> Result<u16, ConfigError> {
    if (1..=65535).contains(&value) {
        Ok(value as u16)
    } else {
        Err(ConfigError::BadPort { name, value })
    }
}

/// Round to a power of two within [1 KiB, 1 MiB].
fn normalize_buffer(bytes: usize) -> usize {
    const MIN: usize = 1024;
    const MAX: usize = 1024 * 1024;
    bytes.clamp(MIN, MAX).next_power_of_two().min(MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::parse_from(["tickforge-proxy"])
    }

    #[test]
    fn defaults_validate() {
        let cfg = ProxyConfig::validate(args()).unwrap();
        assert_eq!(cfg.listen_port, 7001);
        assert_eq!(cfg.direction, Direction::Both);
        assert!(cfg.half_close);
        assert!(!cfg.has_impairments());
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut a = args();
        a.listen_port = 0;
        assert!(matches!(
            ProxyConfig::validate(a),
            Err(ConfigError::BadPort { .. })
        ));
        let mut a = args();
        a.upstream_port = 70_000;
        assert!(ProxyConfig::validate(a).is_err());
    }

    #[test]
    fn bad_direction_is_rejected() {
        let mut a = args();
        a.direction = "sideways".into();
        assert!(matches!(
            ProxyConfig::validate(a),
            Err(ConfigError::BadDirection(_))
        ));
    }

    #[test]
    fn rates_and_timeouts_are_clamped() {
        let mut a = args();
        a.drop_rate = 1.5;
        a.dup_rate = -0.2;
        a.socket_timeout_sec = 0;
        a.idle_timeout_sec = 100_000;
        let cfg = ProxyConfig::validate(a).unwrap();
        assert_eq!(cfg.drop_rate, 1.0);
        assert_eq!(cfg.dup_rate, 0.0);
        assert_eq!(cfg.socket_timeout_sec, 1);
        assert_eq!(cfg.idle_timeout_sec, 3600);
    }

    #[test]
    fn buffer_rounds_to_power_of_two_within_bounds() {
        assert_eq!(normalize_buffer(0), 1024);
        assert_eq!(normalize_buffer(4096), 4096);
        assert_eq!(normalize_buffer(5000), 8192);
        assert_eq!(normalize_buffer(10_000_000), 1024 * 1024);
    }

    #[test]
    fn no_half_close_overrides_default() {
        let a = Args::parse_from(["tickforge-proxy", "--no-half-close"]);
        assert!(!ProxyConfig::validate(a).unwrap().half_close);
        let a = Args::parse_from(["tickforge-proxy", "--half-close"]);
        assert!(ProxyConfig::validate(a).unwrap().half_close);
    }

    #[test]
    fn direction_flags_parse() {
        let a = Args::parse_from(["tickforge-proxy", "--direction", "up"]);
        let cfg = ProxyConfig::validate(a).unwrap();
        assert!(cfg.direction.up_enabled());
        assert!(!cfg.direction.down_enabled());
    }
}
