//! Token-bucket bandwidth shaping.
//!
//! Tokens are bytes. They accrue continuously at the configured rate; a
//! microsecond-level fractional accumulator keeps sub-byte precision across
//! refills so very low rates never round to zero. `allowance` answers "how
//! much can be sent now" without consuming; `consume` takes tokens after a
//! successful send, sleeping in bounded slices while the bucket refills.

use std::time::Instant;

use parking_lot::Mutex;

/// Sends below this size always make progress when the rate permits.
const MIN_QUANTUM: u64 = 1024;

/// Shortest refill sleep.
const MIN_SLEEP_US: u64 = 1_000;
/// Longest refill sleep; keeps the stop flag responsive upstream.
const MAX_SLEEP_US: u64 = 100_000;

struct BucketState {
    tokens: u64,
    last_refill: Instant,
    /// Numerator accumulator in byte-microseconds.
    frac_us: u64,
}

/// Byte-rate token bucket; one per direction per connection.
///
/// Invariant: `0 <= tokens <= max_tokens`.
pub struct TokenBucket {
    rate_bytes_per_sec: u64,
    max_tokens: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Bucket for `rate_bytes_per_sec`, with depth `rate * burst_seconds`
    /// when `burst` is enabled and `rate * 1s` otherwise.
    ///
    /// A zero rate disables shaping entirely.
    pub fn new(rate_bytes_per_sec: u64, burst: bool, burst_seconds: f64) -> Self {
        let window = if burst { burst_seconds.max(1.0) } else { 1.0 };
        let max_tokens = ((rate_bytes_per_sec as f64 * window) as u64).max(1);
        Self {
            rate_bytes_per_sec,
            max_tokens,
            state: Mutex::new(BucketState {
                // Burst mode starts full so the first burst goes through.
                tokens: if burst { max_tokens } else { 0 },
                last_refill: Instant::now(),
                frac_us: 0,
            }),
        }
    }

    /// Bucket depth in bytes.
    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    /// Bytes worth of tokens accrued per 100 ms; a useful send-chunk cap.
    pub fn bytes_per_100ms(&self) -> usize {
        (self.rate_bytes_per_sec / 10).max(1) as usize
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let dt_us = now.duration_since(state.last_refill).as_micros() as u64;
        if dt_us == 0 {
            return;
        }
        // bytes = rate * dt_us / 1e6, carrying the remainder forward.
        let numerator = self.rate_bytes_per_sec as u128 * dt_us as u128 + state.frac_us as u128;
        let add = (numerator / 1_000_000) as u64;
        state.frac_us = (numerator % 1_000_000) as u64;
        state.tokens = (state.tokens + add).min(self.max_tokens);
        state.last_refill = now;
    }

    /// How many bytes may be sent immediately, up to `max_bytes`.
    ///
    /// Refills but never consumes. Returns at least a minimum quantum
    /// (1 KiB when the bucket is deep enough) so tiny sends make progress
    /// even at extremely low rates.
    pub fn allowance(&self, max_bytes: usize) -> usize {
        if self.rate_bytes_per_sec == 0 {
            return max_bytes;
        }
        let mut state = self.state.lock();
        self.refill(&mut state);
        let floor = MIN_QUANTUM.min(self.max_tokens).min(max_bytes as u64).max(1);
        (state.tokens.min(max_bytes as u64)).max(floor) as usize
    }

    /// Consume `bytes` tokens, sleeping while the bucket refills.
    ///
    /// Sleeps are bounded to [1 ms, 100 ms] slices so callers regain control
    /// regularly.
    pub fn consume(&self, bytes: usize) {
        if self.rate_bytes_per_sec == 0 || bytes == 0 {
            return;
        }
        let need = bytes as u64;
        loop {
            let deficit = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= need {
                    state.tokens -= need;
                    return;
                }
                // Oversized sends (beyond bucket depth) drain what exists
                // and charge the rest against future refills.
                if need > self.max_tokens {
                    let rest = need - state.tokens;
                    state.tokens = 0;
                    rest
                } else {
                    need - state.tokens
                }
            };
            let sleep_us = (deficit * 1_000_000 / self.rate_bytes_per_sec.max(1))
                .clamp(MIN_SLEEP_US, MAX_SLEEP_US);
            std::thread::sleep(std::time::Duration::from_micros(sleep_us));
            if need > self.max_tokens {
                // Already charged; the sleep above paid for the overage.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_rate_is_unlimited() {
        let bucket = TokenBucket::new(0, false, 2.0);
        assert_eq!(bucket.allowance(8192), 8192);
        bucket.consume(1 << 20); // returns immediately
    }

    #[test]
    fn burst_mode_starts_full() {
        let bucket = TokenBucket::new(10_000, true, 2.0);
        assert_eq!(bucket.max_tokens(), 20_000);
        assert_eq!(bucket.allowance(8192), 8192);
    }

    #[test]
    fn non_burst_mode_starts_empty_but_floors_at_the_quantum() {
        let bucket = TokenBucket::new(100_000, false, 2.0);
        // Nothing accrued yet, but the minimum quantum keeps progress.
        let allow = bucket.allowance(8192);
        assert!(allow >= 1024);
    }

    #[test]
    fn tokens_accrue_over_time() {
        let bucket = TokenBucket::new(1_000_000, false, 2.0);
        bucket.consume(bucket.allowance(4096));
        std::thread::sleep(Duration::from_millis(20));
        // ~20k bytes accrued in 20ms at 1MB/s.
        let allow = bucket.allowance(1 << 20);
        assert!(allow >= 10_000, "allowance {allow} too small");
    }

    #[test]
    fn fractional_accumulator_preserves_low_rates() {
        // 100 B/s: a 5ms refill adds 0.5 bytes; without the accumulator the
        // bucket would never fill.
        let bucket = TokenBucket::new(100, false, 2.0);
        let mut total_after_refills = 0;
        for _ in 0..40 {
            std::thread::sleep(Duration::from_millis(5));
            let mut state = bucket.state.lock();
            bucket.refill(&mut state);
            total_after_refills = state.tokens;
        }
        // ~200ms elapsed => ~20 bytes accrued, not zero.
        assert!(
            total_after_refills >= 10,
            "accumulated only {total_after_refills} tokens"
        );
    }

    #[test]
    fn consume_blocks_for_roughly_the_token_time() {
        let bucket = TokenBucket::new(100_000, false, 2.0); // 100 kB/s
        let start = Instant::now();
        bucket.consume(5_000); // 50ms worth of tokens
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn allowance_never_exceeds_the_cap() {
        let bucket = TokenBucket::new(1_000_000, true, 2.0);
        assert!(bucket.allowance(512) <= 512);
        assert!(bucket.allowance(4096) <= 4096);
    }
}
