use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::runtime::latch::Latch;
use crate::runtime::lifecycle::{LifecycleState, SystemStatus};

/// Shared bookkeeping for one spawned runtime thread: readiness, the
/// quiescence flag of its pause gate (absent for threads that do not pause,
/// like the control surface listener), and an exit marker.
#[derive(Clone)]
pub struct ThreadInfo {
    pub name: String,
    pub ready: Latch<bool>,
    pub quiescent: Option<Latch<bool>>,
    pub done: Latch<bool>,
}

impl ThreadInfo {
    pub fn new(name: impl Into<String>, quiescent: Option<Latch<bool>>) -> Self {
        Self {
            name: name.into(),
            ready: Latch::new(false),
            quiescent,
            done: Latch::new(false),
        }
    }

    /// Whether the thread currently sits at a paused quiescent point.
    pub fn is_quiescent(&self) -> bool {
        self.quiescent
            .as_ref()
            .map(|flag| flag.peek())
            .unwrap_or(false)
    }
}

/// Registry of runtime threads, shared with the status surface.
pub type ThreadRoster = Arc<Mutex<Vec<ThreadInfo>>>;

/// Flips the owning thread's exit marker when dropped, so panics are
/// indistinguishable from clean exits for join accounting.
pub struct DoneGuard {
    done: Latch<bool>,
}

impl DoneGuard {
    pub fn new(done: Latch<bool>) -> Self {
        Self { done }
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.done.set(true);
    }
}

/// A spawned thread paired with its roster entry.
pub struct ManagedThread {
    pub info: ThreadInfo,
    pub handle: JoinHandle<()>,
}

/// Waits until every roster entry reports ready. Returns false on timeout
/// or when `abort` starts returning true (a thread died during setup).
pub fn wait_all_ready<F>(threads: &[ManagedThread], timeout: Duration, abort: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    for thread in threads {
        loop {
            if thread.info.ready.peek() {
                break;
            }
            if abort() || Instant::now() >= deadline {
                return false;
            }
            thread
                .info
                .ready
                .wait_for(|ready| *ready, Duration::from_millis(10));
        }
    }
    true
}

/// Waits until every pausing thread is quiescent (or has exited). Returns
/// false when the deadline passes first.
pub fn wait_all_quiescent(threads: &[ManagedThread], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    for thread in threads {
        let Some(flag) = thread.info.quiescent.as_ref() else {
            continue;
        };
        loop {
            if flag.peek() || thread.info.done.peek() {
                break;
            }
            if Instant::now() >= deadline {
                return false;
            }
            flag.wait_for(|quiescent| *quiescent, Duration::from_millis(10));
        }
    }
    true
}

/// Derives the externally visible status from the lifecycle plus the
/// per-thread quiescence flags.
pub fn derive_system_status(state: LifecycleState, threads: &[ThreadInfo]) -> SystemStatus {
    let any_quiescent = threads.iter().any(ThreadInfo::is_quiescent);
    let all_quiescent = threads
        .iter()
        .filter(|t| t.quiescent.is_some())
        .all(|t| t.is_quiescent() || t.done.peek());
    match state {
        LifecycleState::Initializing => SystemStatus::Starting,
        LifecycleState::Running => {
            if any_quiescent {
                SystemStatus::Resuming
            } else {
                SystemStatus::Active
            }
        }
        LifecycleState::Paused => {
            if all_quiescent {
                SystemStatus::Paused
            } else {
                SystemStatus::Pausing
            }
        }
        LifecycleState::ShuttingDown | LifecycleState::Stopped => SystemStatus::ShuttingDown,
    }
}
