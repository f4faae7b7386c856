//! Cooperative shutdown signal and lock helpers shared by lifecycle threads

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Lifecycle state stays usable after a panicking user callback.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A set-once flag whose timed waits wake up as soon as it is set.
///
/// Every lifecycle loop sleeps through [`StopEvent::wait`], so a stop
/// request interrupts a sleeping loop immediately instead of after the
/// full interval.
#[derive(Debug, Clone, Default)]
pub struct StopEvent {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let (flag, cvar) = &*self.inner;
        let mut stopped = lock(flag);
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        let (flag, _) = &*self.inner;
        *lock(flag)
    }

    /// Sleep up to `timeout`. Returns true if the event is set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = lock(flag);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stopped = match cvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_times_out_when_unset() {
        let event = StopEvent::new();
        let started = Instant::now();
        assert!(!event.wait(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_set_wakes_waiter() {
        let event = StopEvent::new();
        let waiter = event.clone();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            let stopped = waiter.wait(Duration::from_secs(30));
            (stopped, started.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        event.set();
        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
        assert!(event.is_set());
    }
}
