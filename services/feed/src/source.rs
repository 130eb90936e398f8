//! Feed source trait and shared lifecycle state

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::FeedError;
use crate::telemetry::FeedTelemetry;

/// Lifecycle state machine of one feed source.
///
/// `Completed` is terminal for `start_all`: a completed source is never
/// restarted until an explicit [`SourceState::reset_for_restart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeedStatus {
    /// Constructed or reset, eligible to start
    Idle = 0,
    /// A `run()` invocation is outstanding
    Running = 1,
    /// Stopped externally before natural EOF
    Stopped = 2,
    /// Run loop terminated naturally
    Completed = 3,
}

impl FeedStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FeedStatus::Idle,
            1 => FeedStatus::Running,
            2 => FeedStatus::Stopped,
            _ => FeedStatus::Completed,
        }
    }
}

/// Status word plus cooperative stop flag, embedded in every source.
#[derive(Debug)]
pub struct SourceState {
    status: AtomicU8,
    stop: AtomicBool,
}

impl SourceState {
    /// Fresh `Idle` state.
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(FeedStatus::Idle as u8),
            stop: AtomicBool::new(false),
        }
    }

    /// Current status.
    pub fn status(&self) -> FeedStatus {
        FeedStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Overwrite the status.
    pub fn set_status(&self, status: FeedStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// CAS `Idle -> Running`; true on success.
    ///
    /// This is what makes `start_all` idempotent: a second start while the
    /// source is running or completed is a no-op.
    pub fn try_set_running(&self) -> bool {
        self.status
            .compare_exchange(
                FeedStatus::Idle as u8,
                FeedStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move a terminal status (`Stopped` or `Completed`) back to `Idle` and
    /// clear the stop flag.
    pub fn reset_for_restart(&self) {
        let _ = self.status.compare_exchange(
            FeedStatus::Completed as u8,
            FeedStatus::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.status.compare_exchange(
            FeedStatus::Stopped as u8,
            FeedStatus::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.stop.store(false, Ordering::Release);
    }

    /// Raise the cooperative stop flag.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Lower the stop flag (start of a fresh run).
    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    /// Checked by run loops at each iteration boundary.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl Default for SourceState {
    fn default() -> Self {
        Self::new()
    }
}

/// A producer of orders from one transport.
///
/// `run` blocks until EOF or until the stop flag is raised; a malformed
/// payload never ends a run. Implementations embed a [`SourceState`] and
/// expose it through [`state`](FeedSource::state); the lifecycle methods have
/// default implementations over that state.
pub trait FeedSource: Send + Sync {
    /// Blocking ingest loop.
    fn run(&self) -> Result<(), FeedError>;

    /// Stable identifier for logs and dedup.
    fn source_tag(&self) -> String;

    /// Shared status/stop block.
    fn state(&self) -> &SourceState;

    /// Raise the stop flag; the run loop notices at its next check.
    fn stop(&self) {
        self.state().request_stop();
    }

    /// Rewind or reopen the transport.
    fn reset_stream(&self) -> Result<(), FeedError> {
        Ok(())
    }

    /// Reset a terminal status back to `Idle` and clear the stop flag.
    fn reset_for_restart(&self) {
        self.state().reset_for_restart();
    }

    /// Per-source counters, when the source publishes them.
    fn telemetry(&self) -> Option<&FeedTelemetry> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_start_succeeds_only_from_idle() {
        let s = SourceState::new();
        assert!(s.try_set_running());
        assert_eq!(s.status(), FeedStatus::Running);
        assert!(!s.try_set_running());
    }

    #[test]
    fn completed_does_not_restart_without_reset() {
        let s = SourceState::new();
        assert!(s.try_set_running());
        s.set_status(FeedStatus::Completed);
        assert!(!s.try_set_running());

        s.reset_for_restart();
        assert_eq!(s.status(), FeedStatus::Idle);
        assert!(s.try_set_running());
    }

    #[test]
    fn reset_clears_stop_and_terminal_states() {
        let s = SourceState::new();
        s.set_status(FeedStatus::Stopped);
        s.request_stop();
        s.reset_for_restart();
        assert_eq!(s.status(), FeedStatus::Idle);
        assert!(!s.stop_requested());
    }

    #[test]
    fn reset_leaves_running_untouched() {
        let s = SourceState::new();
        assert!(s.try_set_running());
        s.reset_for_restart();
        assert_eq!(s.status(), FeedStatus::Running);
    }
}
