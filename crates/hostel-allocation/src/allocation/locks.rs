use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// One mutex per key, created on first use.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` while holding the lock for `key`. Calls for other keys proceed.
    pub fn with_lock<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock().expect("keyed lock table poisoned");
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().expect("keyed lock poisoned");
        f()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Admits at most one in-flight run per key. Later callers are turned away
/// rather than queued.
pub struct SingleFlight<K: Eq + Hash> {
    running: Mutex<HashSet<K>>,
}

pub struct FlightGuard<'a, K: Eq + Hash> {
    owner: &'a SingleFlight<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> SingleFlight<K> {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn try_acquire(&self, key: &K) -> Option<FlightGuard<'_, K>> {
        let mut running = self.running.lock().expect("single-flight mutex poisoned");
        if !running.insert(key.clone()) {
            return None;
        }
        Some(FlightGuard {
            owner: self,
            key: key.clone(),
        })
    }
}

impl<K: Eq + Hash + Clone> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Drop for FlightGuard<'_, K> {
    fn drop(&mut self) {
        self.owner
            .running
            .lock()
            .expect("single-flight mutex poisoned")
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn single_flight_releases_on_drop() {
        let flights = SingleFlight::new();
        let guard = flights.try_acquire(&"rule-1").expect("first caller");
        assert!(flights.try_acquire(&"rule-1").is_none());
        assert!(flights.try_acquire(&"rule-2").is_some());
        drop(guard);
        assert!(flights.try_acquire(&"rule-1").is_some());
    }

    #[test]
    fn keyed_lock_serializes_same_key() {
        let locks = KeyedLocks::new();
        let value = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    for _ in 0..50 {
                        locks.with_lock(&"rule-1", || {
                            let current = value.load(Ordering::SeqCst);
                            std::thread::yield_now();
                            value.store(current + 1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(value.load(Ordering::SeqCst), 400);
    }
}
