use std::sync::{Arc, RwLock};

/// Read-mostly value with versioned publishes.
///
/// `read` hands out an independent copy of the last published value;
/// `publish` swaps the value under an exclusive lock and bumps the version so
/// readers can detect staleness without comparing payloads.
pub struct SharedValue<T> {
    shared: Arc<RwLock<Versioned<T>>>,
}

struct Versioned<T> {
    value: T,
    version: u64,
}

impl<T> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> SharedValue<T> {
    pub fn new(initial: T) -> Self {
        Self {
            shared: Arc::new(RwLock::new(Versioned {
                value: initial,
                version: 0,
            })),
        }
    }

    /// Returns a copy of the last published value.
    pub fn read(&self) -> T {
        self.shared.read().unwrap().value.clone()
    }

    /// Returns the last published value together with its version.
    pub fn read_versioned(&self) -> (T, u64) {
        let guard = self.shared.read().unwrap();
        (guard.value.clone(), guard.version)
    }

    /// Replaces the value and bumps the version.
    pub fn publish(&self, value: T) -> u64 {
        let mut guard = self.shared.write().unwrap();
        guard.value = value;
        guard.version += 1;
        guard.version
    }

    pub fn version(&self) -> u64 {
        self.shared.read().unwrap().version
    }
}
