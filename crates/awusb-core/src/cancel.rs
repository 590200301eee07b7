//! Cooperative cancellation for blocking transfers.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Shared cancellation flag.
///
/// Cloning yields a handle to the same flag. Transfers check it before each
/// attempt, and backoff waits wake up as soon as it is raised.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake any waiter.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the wait ended because of cancellation. A duration
    /// too large to form a deadline waits for cancellation alone.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(deadline) = Instant::now().checked_add(duration) else {
            while !*cancelled {
                cancelled = cvar.wait(cancelled).unwrap_or_else(PoisonError::into_inner);
            }
            return true;
        };
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
