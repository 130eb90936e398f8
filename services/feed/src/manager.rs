//! Feed source lifecycle manager

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::error::FeedError;
use crate::source::{FeedSource, FeedStatus};

/// Stable handle minted by [`FeedManager::add_source`].
///
/// Worker threads are keyed by this id, never by pointer identity.
pub type SourceId = u64;

/// Per-worker join deadline in [`FeedManager::stop_all`].
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Settling pause after the join pass, letting late state writes land.
const SHUTDOWN_BARRIER: Duration = Duration::from_millis(50);

struct ManagerState {
    sources: Vec<(SourceId, Arc<dyn FeedSource>)>,
    workers: HashMap<SourceId, JoinHandle<()>>,
    next_id: SourceId,
}

/// Completion set shared between the manager and its workers.
#[derive(Default)]
struct Completion {
    completed: Mutex<HashSet<SourceId>>,
    cv: Condvar,
}

impl Completion {
    fn mark(&self, id: SourceId) {
        self.completed.lock().insert(id);
        self.cv.notify_all();
    }
}

/// Owns a set of feed sources and their worker threads.
///
/// Start is idempotent per source: only the `Idle -> Running` CAS winner
/// spawns a worker, so concurrent `start_all` calls cannot double-run a
/// source. Workers always publish `Completed` on exit — even when `run`
/// errors or panics — and signal the completion condvar.
pub struct FeedManager {
    state: Mutex<ManagerState>,
    completion: Arc<Completion>,
}

impl FeedManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState {
                sources: Vec::new(),
                workers: HashMap::new(),
                next_id: 0,
            }),
            completion: Arc::new(Completion::default()),
        }
    }

    /// Register a source, returning its stable id.
    pub fn add_source(&self, source: Arc<dyn FeedSource>) -> SourceId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.sources.push((id, source));
        id
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// Start every eligible source.
    ///
    /// With `unique_tags`, at most one source per tag is started within this
    /// call. Sources that are running or completed are skipped by the status
    /// CAS; finished worker threads are reaped first so a reset source can be
    /// restarted.
    pub fn start_all(&self, unique_tags: bool) {
        let mut state = self.state.lock();
        let mut started_tags: HashSet<String> = HashSet::new();

        let sources: Vec<(SourceId, Arc<dyn FeedSource>)> = state
            .sources
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect();

        for (id, source) in sources {
            let tag = source.source_tag();
            if unique_tags && !started_tags.insert(tag.clone()) {
                continue;
            }

            // Reap a finished worker so the slot can be reused.
            if state
                .workers
                .get(&id)
                .map(|w| w.is_finished())
                .unwrap_or(false)
            {
                if let Some(handle) = state.workers.remove(&id) {
                    let _ = handle.join();
                }
            }

            if state.workers.contains_key(&id) || !source.state().try_set_running() {
                continue;
            }

            let worker_source = Arc::clone(&source);
            let completion = Arc::clone(&self.completion);
            let handle = std::thread::Builder::new()
                .name(format!("feed-{id}"))
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        worker_source.run()
                    }));
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(tag = %worker_source.source_tag(), error = %e, "feed run failed");
                        }
                        Err(_) => {
                            warn!(tag = %worker_source.source_tag(), "feed run panicked");
                            if let Some(t) = worker_source.telemetry() {
                                t.stamina
                                    .thread_failures
                                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            }
                        }
                    }
                    // Terminal status is published unconditionally so the
                    // manager never waits on a dead worker.
                    worker_source.state().set_status(FeedStatus::Completed);
                    completion.mark(id);
                })
                .expect("spawning feed worker");

            info!(tag = %tag, id, "feed source started");
            state.workers.insert(id, handle);
        }
    }

    /// Stop every source and join workers against a deadline.
    ///
    /// Workers that miss the deadline are surfaced in
    /// [`FeedError::ShutdownTimeout`]; their handles stay registered so a
    /// later call can finish the join. Detaching is never an option.
    pub fn stop_all(&self) -> Result<(), FeedError> {
        let mut state = self.state.lock();
        for (_, source) in &state.sources {
            source.stop();
        }

        let deadline = Instant::now() + SHUTDOWN_DEADLINE;
        let mut pending = Vec::new();
        let ids: Vec<SourceId> = state.workers.keys().copied().collect();
        for id in ids {
            let handle = state
                .workers
                .remove(&id)
                .expect("id taken from the worker map");
            if wait_finished(&handle, deadline) {
                let _ = handle.join();
            } else {
                let tag = state
                    .sources
                    .iter()
                    .find(|(sid, _)| *sid == id)
                    .map(|(_, s)| s.source_tag())
                    .unwrap_or_else(|| format!("source-{id}"));
                pending.push(tag);
                state.workers.insert(id, handle);
            }
        }
        drop(state);

        std::thread::sleep(SHUTDOWN_BARRIER);
        self.completion.completed.lock().clear();

        if pending.is_empty() {
            Ok(())
        } else {
            Err(FeedError::ShutdownTimeout {
                timeout: SHUTDOWN_DEADLINE,
                pending,
            })
        }
    }

    /// Stop everything, then reset every source for a clean restart.
    pub fn reset_all_sources(&self) -> Result<(), FeedError> {
        self.stop_all()?;
        let state = self.state.lock();
        for (_, source) in &state.sources {
            source.reset_for_restart();
            source.reset_stream()?;
            if let Some(t) = source.telemetry() {
                t.stamina
                    .successful_restarts
                    .store(0, std::sync::atomic::Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Block until every source has completed or `timeout` expires.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let total = self.source_count();
        let deadline = Instant::now() + timeout;
        let mut completed = self.completion.completed.lock();
        while completed.len() < total {
            if self.completion.cv.wait_until(&mut completed, deadline).timed_out() {
                return completed.len() >= total;
            }
        }
        true
    }

    /// Workers whose threads are still alive.
    pub fn active_thread_count(&self) -> usize {
        self.state
            .lock()
            .workers
            .values()
            .filter(|w| !w.is_finished())
            .count()
    }
}

impl Default for FeedManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FeedManager {
    fn drop(&mut self) {
        if let Err(e) = self.stop_all() {
            warn!(error = %e, "feed manager dropped with workers still running");
        }
    }
}

/// Poll a worker handle for completion until `deadline`.
fn wait_finished(handle: &JoinHandle<()>, deadline: Instant) -> bool {
    loop {
        if handle.is_finished() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
