use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Monotonic wall clock paired with a pause-aware virtual clock.
///
/// `wall` reports fractional seconds since construction and never stops.
/// `virtual_now` advances 1:1 with wall time while the runtime is running,
/// freezes while it is paused, and continues from the frozen value on resume.
/// Both readings are monotone non-decreasing.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    origin: Instant,
    state: Mutex<VirtualState>,
}

struct VirtualState {
    paused: bool,
    /// Virtual reading at the last pause/resume/restore transition.
    anchor_virtual: f64,
    /// Wall reading at the last transition; meaningful only while running.
    anchor_wall: f64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                origin: Instant::now(),
                state: Mutex::new(VirtualState {
                    paused: false,
                    anchor_virtual: 0.0,
                    anchor_wall: 0.0,
                }),
            }),
        }
    }

    /// Monotonic fractional seconds since the clock was created.
    pub fn wall(&self) -> f64 {
        self.inner.origin.elapsed().as_secs_f64()
    }

    /// Pause-aware monotonic seconds.
    pub fn virtual_now(&self) -> f64 {
        let state = self.inner.state.lock().unwrap();
        if state.paused {
            state.anchor_virtual
        } else {
            state.anchor_virtual + (self.wall() - state.anchor_wall)
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().unwrap().paused
    }

    /// Freezes the virtual clock at its current reading. Idempotent.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.paused {
            return;
        }
        state.anchor_virtual += self.wall() - state.anchor_wall;
        state.paused = true;
    }

    /// Resumes the virtual clock from its frozen reading. Idempotent.
    pub fn resume(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if !state.paused {
            return;
        }
        state.anchor_wall = self.wall();
        state.paused = false;
    }

    /// Continues the virtual clock from a persisted offset.
    pub fn restore(&self, virtual_offset: f64) {
        let mut state = self.inner.state.lock().unwrap();
        state.anchor_virtual = virtual_offset;
        state.anchor_wall = self.wall();
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
