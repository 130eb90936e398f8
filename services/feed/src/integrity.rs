//! Tamper-evidence hashing and the append-only integrity log

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Hex-encoded SHA-256 of `input`.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Append-only integrity log.
///
/// One instance is created in `main` and handed to the sources that verify
/// payload hashes; there is no process-wide singleton. Lines are single-line
/// and carriage-return free:
///
/// ```text
/// [FEED] [<tag>] SHA256=<hex> line=<raw>
/// [ANOMALY] [<tag>] Expected=<hex> Got=<hex>
/// ```
pub struct IntegrityLog {
    file: Mutex<File>,
}

impl IntegrityLog {
    /// Default sink at `logs/feed_hash.log`, creating the directory.
    pub fn open_default() -> std::io::Result<Self> {
        fs::create_dir_all("logs")?;
        Self::at_path("logs/feed_hash.log")
    }

    /// Sink at an explicit path.
    pub fn at_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Record a verified payload.
    pub fn log_packet(&self, tag: &str, line: &str, hash: &str) {
        self.write_line(format_args!(
            "[FEED] [{tag}] SHA256={hash} line={}",
            sanitize(line)
        ));
    }

    /// Record a hash mismatch.
    pub fn log_anomaly(&self, tag: &str, expected: &str, got: &str) {
        self.write_line(format_args!(
            "[ANOMALY] [{tag}] Expected={expected} Got={got}"
        ));
    }

    fn write_line(&self, args: std::fmt::Arguments<'_>) {
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{args}") {
            warn!(error = %e, "integrity log write failed");
        }
    }
}

// Control bytes would break the one-record-per-line format.
fn sanitize(line: &str) -> String {
    line.chars().filter(|c| !c.is_control()).collect()
}
