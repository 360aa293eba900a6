use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::latch::Latch;

/// How long a blocked gate or sleep waits between re-checks of the lifecycle.
/// Bounds the latency with which shutdown reaches every suspension point.
pub const LIFECYCLE_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Process-wide lifecycle. Transitions are monotonic past `ShuttingDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Initializing,
    Running,
    Paused,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
        }
    }

    /// True once shutdown has begun; no transition leads back out.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::ShuttingDown | LifecycleState::Stopped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable system status reported by the control surface. Distinguishes
/// the transitional `Pausing`/`Resuming` phases in which some threads have
/// not yet reached (or left) their quiescent point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Starting,
    Active,
    Pausing,
    Paused,
    Resuming,
    ShuttingDown,
}

impl SystemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemStatus::Starting => "starting",
            SystemStatus::Active => "active",
            SystemStatus::Pausing => "pausing",
            SystemStatus::Paused => "paused",
            SystemStatus::Resuming => "resuming",
            SystemStatus::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned from a suspension point when shutdown began while blocked.
/// Callers unwind to their loop exit without reporting an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled by shutdown")]
pub struct Cancelled;

/// Outcome of a non-blocking gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePoll {
    /// The runtime is running; proceed with the next iteration.
    Proceed,
    /// The runtime is paused; the caller should run its pause hook and then
    /// block on [`PauseGate::block_until_resumed`].
    Paused,
    /// Shutdown began; exit the loop.
    Cancelled,
}

/// Per-thread synchronization point against the lifecycle.
///
/// While the owner is blocked here during a pause, its quiescence flag is
/// raised so the orchestrator can detect that every thread reached a safe
/// point before reporting the pause as complete.
pub struct PauseGate {
    lifecycle: Latch<LifecycleState>,
    quiescent: Latch<bool>,
}

impl PauseGate {
    pub fn new(lifecycle: Latch<LifecycleState>) -> Self {
        Self {
            lifecycle,
            quiescent: Latch::new(false),
        }
    }

    /// Shared handle to this gate's quiescence flag.
    pub fn quiescence(&self) -> Latch<bool> {
        self.quiescent.clone()
    }

    /// Checks the lifecycle without blocking on a pause. Waits out the
    /// initialization phase so loops only start once the runtime is live.
    pub fn poll(&self) -> GatePoll {
        loop {
            match self.lifecycle.peek() {
                LifecycleState::Running => return GatePoll::Proceed,
                LifecycleState::Paused => return GatePoll::Paused,
                LifecycleState::Initializing => {
                    self.lifecycle.wait_for(
                        |state| !matches!(state, LifecycleState::Initializing),
                        LIFECYCLE_WAIT_SLICE,
                    );
                }
                LifecycleState::ShuttingDown | LifecycleState::Stopped => {
                    return GatePoll::Cancelled;
                }
            }
        }
    }

    /// Blocks while the lifecycle is `Paused`, with the quiescence flag
    /// raised. Returns `Ok` on resume and `Err(Cancelled)` on shutdown.
    pub fn block_until_resumed(&self) -> Result<(), Cancelled> {
        self.quiescent.set(true);
        let result = loop {
            match self.lifecycle.peek() {
                LifecycleState::Running => break Ok(()),
                LifecycleState::ShuttingDown | LifecycleState::Stopped => break Err(Cancelled),
                LifecycleState::Paused | LifecycleState::Initializing => {
                    self.lifecycle.wait_for_change(LIFECYCLE_WAIT_SLICE);
                }
            }
        };
        self.quiescent.set(false);
        result
    }

    /// Combined check: returns immediately while running, blocks through a
    /// pause, raises `Cancelled` once shutdown begins. For callers with
    /// pause/resume hooks, use [`PauseGate::poll`] and
    /// [`PauseGate::block_until_resumed`] so the hooks can run around the
    /// blocked section.
    pub fn wait_if_paused(&self) -> Result<(), Cancelled> {
        match self.poll() {
            GatePoll::Proceed => Ok(()),
            GatePoll::Paused => self.block_until_resumed(),
            GatePoll::Cancelled => Err(Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn gate_blocks_while_paused_and_raises_quiescence() {
        let lifecycle = Latch::new(LifecycleState::Paused);
        let gate = PauseGate::new(lifecycle.clone());
        let quiescent = gate.quiescence();
        let handle = thread::spawn(move || gate.wait_if_paused());
        assert!(quiescent.wait_for(|q| *q, Duration::from_secs(1)));
        lifecycle.set(LifecycleState::Running);
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert!(!quiescent.peek());
    }

    #[test]
    fn gate_cancels_on_shutdown() {
        let lifecycle = Latch::new(LifecycleState::ShuttingDown);
        let gate = PauseGate::new(lifecycle);
        assert_eq!(gate.wait_if_paused(), Err(Cancelled));
    }
}
