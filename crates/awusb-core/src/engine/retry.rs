//! Bounded retry on stalls.
//!
//! `attempt -> {progress, stall -> backoff -> retry, fatal -> abort}`. The
//! state machine only counts and decides; waiting is left to the caller so
//! that it can honour cancellation.

use std::time::Duration;

use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive stalls tolerated; the last one is not followed by a retry.
    pub max_stalls: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_stalls: u32, backoff: Duration) -> Self {
        Self {
            max_stalls,
            backoff,
        }
    }
}

/// Classified result of one transfer attempt.
#[derive(Debug)]
pub enum Attempt {
    /// The device moved this many bytes (never zero).
    Progress(usize),
    /// Transient not-ready condition.
    Stall,
    Fatal(TransportError),
}

/// What to do after a stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Backoff(Duration),
    Exhausted { stalls: u32 },
}

#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    stalls: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, stalls: 0 }
    }

    pub fn on_stall(&mut self) -> Next {
        self.stalls += 1;
        if self.stalls >= self.policy.max_stalls {
            Next::Exhausted {
                stalls: self.stalls,
            }
        } else {
            Next::Backoff(self.policy.backoff)
        }
    }

    /// Progress resets the budget; only consecutive stalls count.
    pub fn on_progress(&mut self) {
        self.stalls = 0;
    }

    pub fn stalls(&self) -> u32 {
        self.stalls
    }

    pub fn max_stalls(&self) -> u32 {
        self.policy.max_stalls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausts_on_last_stall() {
        let mut retry = RetryState::new(RetryPolicy::new(3, Duration::from_millis(7)));
        assert_eq!(retry.on_stall(), Next::Backoff(Duration::from_millis(7)));
        assert_eq!(retry.on_stall(), Next::Backoff(Duration::from_millis(7)));
        assert_eq!(retry.on_stall(), Next::Exhausted { stalls: 3 });
    }

    #[test]
    fn test_progress_resets_budget() {
        let mut retry = RetryState::new(RetryPolicy::new(2, Duration::ZERO));
        assert_eq!(retry.on_stall(), Next::Backoff(Duration::ZERO));
        retry.on_progress();
        assert_eq!(retry.stalls(), 0);
        assert_eq!(retry.on_stall(), Next::Backoff(Duration::ZERO));
        assert_eq!(retry.on_stall(), Next::Exhausted { stalls: 2 });
    }
}
