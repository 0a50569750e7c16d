//! Bounded rejoin budget.
//!
//! A peer connection that fails is rejoined at most
//! [`ReconnectPolicy::max_attempts`] times per session (one by default).
//! The budget is not refilled after a successful reconnect: once it is
//! spent, the next failure is fatal and the UI offers a manual reconnect
//! instead.

use std::time::Duration;

/// Tunable parameters for the rejoin strategy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Automatic rejoins allowed per session.
    pub max_attempts: u32,
    /// Delay before a rejoin is attempted.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// What to do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Rejoin; `attempt` is 1-based.
    Rejoin { attempt: u32 },
    /// The budget is spent.
    GiveUp { attempts: u32 },
}

/// Tracks how much of the [`ReconnectPolicy`] has been used.
#[derive(Debug, Clone)]
pub struct ReconnectBudget {
    policy: ReconnectPolicy,
    used: u32,
}

impl ReconnectBudget {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, used: 0 }
    }

    /// Record a failure and decide whether to rejoin.
    pub fn on_failure(&mut self) -> FailureVerdict {
        if self.used < self.policy.max_attempts {
            self.used += 1;
            FailureVerdict::Rejoin { attempt: self.used }
        } else {
            FailureVerdict::GiveUp {
                attempts: self.used,
            }
        }
    }

    pub fn attempts_used(&self) -> u32 {
        self.used
    }

    pub fn delay(&self) -> Duration {
        self.policy.delay
    }
}
