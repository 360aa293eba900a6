use std::time::Duration;

use super::clock::Clock;
use super::latch::Latch;
use super::lifecycle::{Cancelled, LifecycleState, LIFECYCLE_WAIT_SLICE};

/// Why a timed wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepStatus {
    /// The requested virtual interval elapsed.
    Elapsed,
    /// The runtime paused; the caller should park at its pause gate and
    /// retry the wait after resuming.
    Paused,
    /// Shutdown began.
    Cancelled,
}

/// Shared handles every long-running component receives at construction:
/// the clock and the lifecycle latch. There are no process-wide singletons;
/// everything time- or lifecycle-dependent goes through a context clone.
#[derive(Clone)]
pub struct RuntimeContext {
    clock: Clock,
    lifecycle: Latch<LifecycleState>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            clock: Clock::new(),
            lifecycle: Latch::new(LifecycleState::Initializing),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn lifecycle(&self) -> &Latch<LifecycleState> {
        &self.lifecycle
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.peek()
    }

    /// Waits until the virtual clock reaches `target`, yielding as soon as a
    /// pause or shutdown is observed. Used by paced loops that must reach
    /// their pause gate instead of sleeping through a pause.
    pub fn virtual_sleep_until(&self, target: f64) -> SleepStatus {
        loop {
            match self.lifecycle.peek() {
                state if state.is_terminal() => return SleepStatus::Cancelled,
                LifecycleState::Paused => return SleepStatus::Paused,
                _ => {}
            }
            let remaining = target - self.clock.virtual_now();
            if remaining <= 0.0 {
                return SleepStatus::Elapsed;
            }
            let slice = Duration::from_secs_f64(remaining)
                .min(LIFECYCLE_WAIT_SLICE)
                .max(Duration::from_micros(100));
            self.lifecycle.wait_for_change(slice);
        }
    }

    /// Sleeps until `seconds` of virtual time have elapsed.
    ///
    /// A pause freezes the virtual clock, so pauses extend the sleep by the
    /// paused wall duration. Returns `Err(Cancelled)` as soon as shutdown is
    /// observed, bounded by [`LIFECYCLE_WAIT_SLICE`].
    pub fn virtual_sleep(&self, seconds: f64) -> Result<(), Cancelled> {
        let target = self.clock.virtual_now() + seconds.max(0.0);
        loop {
            match self.virtual_sleep_until(target) {
                SleepStatus::Elapsed => return Ok(()),
                SleepStatus::Cancelled => return Err(Cancelled),
                SleepStatus::Paused => {
                    self.lifecycle.wait_for(
                        |state| !matches!(state, LifecycleState::Paused),
                        LIFECYCLE_WAIT_SLICE,
                    );
                }
            }
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_sleep_returns_after_the_requested_virtual_interval() {
        let ctx = RuntimeContext::new();
        ctx.lifecycle().set(LifecycleState::Running);
        let before = ctx.clock().virtual_now();
        ctx.virtual_sleep(0.05).unwrap();
        assert!(ctx.clock().virtual_now() - before >= 0.05);
    }

    #[test]
    fn virtual_sleep_is_cancelled_by_shutdown() {
        let ctx = RuntimeContext::new();
        ctx.lifecycle().set(LifecycleState::ShuttingDown);
        assert_eq!(ctx.virtual_sleep(10.0), Err(Cancelled));
    }

    #[test]
    fn sleep_until_yields_on_pause() {
        let ctx = RuntimeContext::new();
        ctx.lifecycle().set(LifecycleState::Paused);
        let target = ctx.clock().virtual_now() + 5.0;
        assert_eq!(ctx.virtual_sleep_until(target), SleepStatus::Paused);
    }
}
