//! Crash-dump handling for unrecoverable errors.
//!
//! Leaf code never exits the process: fatal conditions propagate as errors to
//! the binary's top level, which records a crash dump through here and exits.
//! Keeping the dump writer separate lets tests intercept the fatal path.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Write a crash dump describing `reason` at `path`.
pub fn write_crash_dump(path: impl AsRef<Path>, reason: &str) -> std::io::Result<PathBuf> {
    let path = path.as_ref();
    let mut dump = File::create(path)?;
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    writeln!(dump, "timestamp: {epoch}")?;
    writeln!(dump, "reason: {reason}")?;
    Ok(path.to_path_buf())
}

/// Record `reason` in `crash.dump` and terminate with exit code 1.
///
/// The single process-exit site of the engine binary.
pub fn abort_with_dump(reason: &str) -> ! {
    eprintln!("[FATAL] {reason}");
    match write_crash_dump("crash.dump", reason) {
        Ok(path) => eprintln!("crash dump written to {}", path.display()),
        Err(e) => eprintln!("failed to write crash dump: {e}"),
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_records_the_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.dump");
        write_crash_dump(&path, "volume overflow in window 42").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("reason: volume overflow in window 42"));
        assert!(content.starts_with("timestamp: "));
    }
}
