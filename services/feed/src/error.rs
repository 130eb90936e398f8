//! Feed subsystem errors

use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by feed sources and the manager.
///
/// Parse-level problems are never errors: sources count them as anomalies and
/// keep running. An error from `run()` means the transport itself failed; the
/// manager still transitions the source to `Completed`.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport-level I/O failure (file, socket or mmap)
    #[error("feed transport i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Shared-memory ring rejected the attach
    #[error("shared-memory ring: {0}")]
    Ring(String),

    /// Workers missed the shutdown deadline; handles are retained, never
    /// detached
    #[error("feed workers still running after {timeout:?}: {pending:?}")]
    ShutdownTimeout {
        /// The deadline that was missed
        timeout: Duration,
        /// Tags of the sources whose workers are still running
        pending: Vec<String>,
    },
}
