use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A single shared value with many readers and one writer.
///
/// Readers either peek the current value or block until it changes. Writes
/// wake every waiter, so a latch is suited to low-frequency state such as the
/// lifecycle or per-thread readiness bits, not to data-plane traffic.
pub struct Latch<T> {
    shared: Arc<LatchShared<T>>,
}

struct LatchShared<T> {
    value: Mutex<T>,
    cv: Condvar,
}

impl<T> Clone for Latch<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> Latch<T> {
    pub fn new(initial: T) -> Self {
        Self {
            shared: Arc::new(LatchShared {
                value: Mutex::new(initial),
                cv: Condvar::new(),
            }),
        }
    }

    /// Returns a copy of the current value.
    pub fn peek(&self) -> T {
        self.shared.value.lock().unwrap().clone()
    }

    /// Replaces the value and wakes every waiter.
    pub fn set(&self, value: T) {
        let mut guard = self.shared.value.lock().unwrap();
        *guard = value;
        self.shared.cv.notify_all();
    }

    /// Blocks until `pred` holds or `timeout` elapses. Returns whether the
    /// predicate was satisfied.
    pub fn wait_for<F>(&self, pred: F, timeout: Duration) -> bool
    where
        F: Fn(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.value.lock().unwrap();
        loop {
            if pred(&guard) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self.shared.cv.wait_timeout(guard, deadline - now).unwrap();
            guard = next;
        }
    }

    /// Waits at most `timeout` for any write, then returns the current value.
    /// Spurious wakeups are allowed; callers re-check the value they receive.
    pub fn wait_for_change(&self, timeout: Duration) -> T {
        let guard = self.shared.value.lock().unwrap();
        let (next, _) = self.shared.cv.wait_timeout(guard, timeout).unwrap();
        next.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_for_observes_cross_thread_writes() {
        let latch = Latch::new(0u32);
        let writer = latch.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set(7);
        });
        assert!(latch.wait_for(|v| *v == 7, Duration::from_secs(1)));
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_times_out() {
        let latch = Latch::new(false);
        assert!(!latch.wait_for(|v| *v, Duration::from_millis(30)));
    }
}
