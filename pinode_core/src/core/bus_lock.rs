//! Per-physical-bus mutual exclusion
//!
//! A [`BusLock`] is shared by every device on one bus (an I2C adapter, the
//! camera). Acquisition waits at most the configured timeout and then fails
//! with `ResourceUnavailable`. The returned [`BusLockGuard`] is owned (not
//! borrowed), so a device can hold it across calls for a whole session, and
//! releases the bus when dropped on any exit path.
//!
//! The lock is not reentrant: acquiring it again while holding a guard, even
//! from the same thread, waits and times out.

use crate::error::{PinodeError, PinodeResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct LockState {
    holder: Option<String>,
}

struct Inner {
    name: String,
    state: Mutex<LockState>,
    released: Condvar,
}

/// Mutual-exclusion token for one physical bus
#[derive(Clone)]
pub struct BusLock {
    inner: Arc<Inner>,
    timeout: Duration,
}

impl BusLock {
    pub fn new(name: &str, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(LockState { holder: None }),
                released: Condvar::new(),
            }),
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire with the configured timeout
    pub fn acquire(&self, holder: &str) -> PinodeResult<BusLockGuard> {
        self.acquire_timeout(holder, self.timeout)
    }

    /// Acquire, waiting at most `timeout`
    pub fn acquire_timeout(&self, holder: &str, timeout: Duration) -> PinodeResult<BusLockGuard> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();

        while let Some(current) = state.holder.clone() {
            let timed_out = self.inner.released.wait_until(&mut state, deadline).timed_out();
            if timed_out && state.holder.is_some() {
                return Err(PinodeError::unavailable(format!(
                    "bus '{}' still held by '{}' after {:?}",
                    self.inner.name, current, timeout
                )));
            }
        }

        state.holder = Some(holder.to_string());
        log::trace!("bus '{}' acquired by '{}'", self.inner.name, holder);
        Ok(BusLockGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Acquire only if free right now
    pub fn try_acquire(&self, holder: &str) -> PinodeResult<BusLockGuard> {
        self.acquire_timeout(holder, Duration::ZERO)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().holder.is_some()
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<String> {
        self.inner.state.lock().holder.clone()
    }
}

impl fmt::Debug for BusLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusLock")
            .field("name", &self.inner.name)
            .field("holder", &self.holder())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Held bus; released on drop
pub struct BusLockGuard {
    inner: Arc<Inner>,
}

impl BusLockGuard {
    pub fn bus(&self) -> &str {
        &self.inner.name
    }
}

impl Drop for BusLockGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if let Some(holder) = state.holder.take() {
            log::trace!("bus '{}' released by '{}'", self.inner.name, holder);
        }
        drop(state);
        self.inner.released.notify_one();
    }
}

impl fmt::Debug for BusLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusLockGuard")
            .field("bus", &self.inner.name)
            .finish()
    }
}

/// Process-scoped table of bus locks, keyed by bus name ("i2c-1", "camera")
#[derive(Clone, Default)]
pub struct BusLockRegistry {
    locks: Arc<Mutex<HashMap<String, BusLock>>>,
    timeout: Duration,
}

impl BusLockRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// The lock for `bus`, created on first use
    pub fn lock_for(&self, bus: &str) -> BusLock {
        self.locks
            .lock()
            .entry(bus.to_string())
            .or_insert_with(|| BusLock::new(bus, self.timeout))
            .clone()
    }

    /// Buses currently held, with their holders
    pub fn held(&self) -> Vec<(String, String)> {
        let mut held: Vec<_> = self
            .locks
            .lock()
            .values()
            .filter_map(|lock| lock.holder().map(|h| (lock.name().to_string(), h)))
            .collect();
        held.sort();
        held
    }
}

impl fmt::Debug for BusLockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusLockRegistry")
            .field("held", &self.held())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = BusLock::new("i2c-1", Duration::from_millis(50));
        {
            let guard = lock.acquire("bmp").unwrap();
            assert_eq!(guard.bus(), "i2c-1");
            assert_eq!(lock.holder(), Some("bmp".to_string()));
        }
        assert!(!lock.is_locked());
        lock.try_acquire("bno").unwrap();
    }

    #[test]
    fn test_timeout_is_resource_unavailable() {
        let lock = BusLock::new("i2c-1", Duration::from_millis(20));
        let _guard = lock.acquire("bmp").unwrap();

        let start = Instant::now();
        let err = lock.acquire("bno").unwrap_err();
        assert!(matches!(err, PinodeError::ResourceUnavailable(_)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_not_reentrant() {
        let lock = BusLock::new("camera", Duration::from_millis(10));
        let _guard = lock.acquire("camera").unwrap();
        assert!(lock.acquire("camera").is_err());
    }

    #[test]
    fn test_released_by_failing_transaction() {
        let lock = BusLock::new("i2c-1", Duration::from_millis(10));
        let transaction = || -> PinodeResult<()> {
            let _guard = lock.acquire("bmp")?;
            Err(PinodeError::driver("nack"))
        };
        assert!(transaction().is_err());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let lock = BusLock::new("i2c-1", Duration::from_secs(2));
        let guard = lock.acquire("first").unwrap();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || lock.acquire("second").map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);

        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_registry_shares_locks_per_bus() {
        let registry = BusLockRegistry::new(Duration::from_millis(10));
        let a = registry.lock_for("i2c-1");
        let b = registry.lock_for("i2c-1");
        let other = registry.lock_for("i2c-2");

        let _guard = a.acquire("bmp").unwrap();
        assert!(b.is_locked());
        assert!(!other.is_locked());
        assert_eq!(
            registry.held(),
            vec![("i2c-1".to_string(), "bmp".to_string())]
        );
    }
}
