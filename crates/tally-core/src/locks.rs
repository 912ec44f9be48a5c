//! Per-key mutual exclusion for the merge critical section
//!
//! The find-or-create-or-merge step must be serialized per fingerprint while
//! unrelated fingerprints proceed fully in parallel, with no global pipeline
//! lock. `KeyedLocks` hands out one `tokio::sync::Mutex` per live key;
//! entries whose mutex is no longer held anywhere are swept opportunistically
//! so the map stays bounded under churn.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Map size at which idle entries get swept during `acquire`.
const SWEEP_THRESHOLD: usize = 1024;

/// A set of async mutexes, one per key.
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Get the mutex for `key`, creating it on first use. Lock the returned
    /// handle (`.lock().await`) to enter the critical section; dropping the
    /// guard releases it.
    pub fn acquire(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("keyed lock map poisoned");
        if map.len() >= SWEEP_THRESHOLD {
            // strong_count == 1 means only the map holds the mutex: idle.
            map.retain(|_, m| Arc::strong_count(m) > 1);
        }
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Number of keys currently tracked (idle entries included until swept).
    pub fn tracked(&self) -> usize {
        self.inner.lock().expect("keyed lock map poisoned").len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let in_section = Arc::clone(&in_section);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let m = locks.acquire(&42u64);
                let _guard = m.lock().await;
                let n = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(n, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_run_in_parallel() {
        let locks = Arc::new(KeyedLocks::new());
        let a = locks.acquire(&1u64);
        let _guard = a.lock().await;

        // A different key must not be blocked by the held lock.
        let b = locks.acquire(&2u64);
        let entered = tokio::time::timeout(std::time::Duration::from_millis(50), b.lock()).await;
        assert!(entered.is_ok());
    }

    #[tokio::test]
    async fn acquire_reuses_the_same_mutex_per_key() {
        let locks = KeyedLocks::new();
        let a = locks.acquire(&7u64);
        let b = locks.acquire(&7u64);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.tracked(), 1);
    }
}
