//! One-second-resolution session countdown.
//!
//! [`SessionTimer`] does not own a clock: the caller drives it with
//! [`tick`](SessionTimer::tick) once per second (the controller uses a
//! `tokio::time::interval`). Each call reports the new remaining time and
//! any [`TimerEvent`]s it produced.
//!
//! Guarantees:
//! - remaining time never goes below zero;
//! - every warning threshold fires at most once per session;
//! - `Expired` fires exactly once, after which ticks are no-ops.
//!
//! State is in-memory only and resets when the process restarts.

use serde::Serialize;

use crate::error::CoreError;

/// Default warning thresholds: five minutes and one minute left.
pub const DEFAULT_WARNING_THRESHOLDS_SECS: [u64; 2] = [300, 60];

/// Something the UI should react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEvent {
    Started { duration_secs: u64 },
    Warning { threshold_secs: u64, remaining_secs: u64 },
    Expired,
}

/// Result of a single [`SessionTimer::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub remaining_secs: u64,
    pub events: Vec<TimerEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
    Expired,
}

#[derive(Debug, Clone, Copy)]
struct Threshold {
    secs: u64,
    fired: bool,
}

#[derive(Debug, Clone)]
pub struct SessionTimer {
    /// Sorted descending so warnings fire in countdown order.
    thresholds: Vec<Threshold>,
    duration_secs: u64,
    remaining_secs: u64,
    state: RunState,
}

impl SessionTimer {
    /// Create an idle timer with the given warning thresholds (seconds
    /// remaining). Zero is dropped because expiry already covers it;
    /// duplicates collapse into one.
    pub fn new(thresholds: impl IntoIterator<Item = u64>) -> Self {
        let mut secs: Vec<u64> = thresholds.into_iter().filter(|&t| t > 0).collect();
        secs.sort_unstable_by(|a, b| b.cmp(a));
        secs.dedup();

        Self {
            thresholds: secs
                .into_iter()
                .map(|secs| Threshold { secs, fired: false })
                .collect(),
            duration_secs: 0,
            remaining_secs: 0,
            state: RunState::Idle,
        }
    }

    /// Begin counting down from `duration_secs`.
    ///
    /// Thresholds at or above the duration can never be crossed and are
    /// marked as spent. A zero duration expires immediately.
    pub fn start(&mut self, duration_secs: u64) -> Result<Vec<TimerEvent>, CoreError> {
        if self.state != RunState::Idle {
            return Err(CoreError::Validation(
                "Session timer has already been started".to_string(),
            ));
        }

        self.duration_secs = duration_secs;
        self.remaining_secs = duration_secs;
        for threshold in &mut self.thresholds {
            threshold.fired = threshold.secs >= duration_secs;
        }

        let mut events = vec![TimerEvent::Started { duration_secs }];
        if duration_secs == 0 {
            self.state = RunState::Expired;
            events.push(TimerEvent::Expired);
        } else {
            self.state = RunState::Running;
        }
        Ok(events)
    }

    /// Advance the countdown by one second.
    ///
    /// Outside the running state this returns the current remaining time
    /// with no events.
    pub fn tick(&mut self) -> Tick {
        if self.state != RunState::Running {
            return Tick {
                remaining_secs: self.remaining_secs,
                events: Vec::new(),
            };
        }

        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        let remaining = self.remaining_secs;

        let mut events = Vec::new();
        for threshold in self.thresholds.iter_mut().filter(|t| !t.fired) {
            if remaining <= threshold.secs {
                threshold.fired = true;
                events.push(TimerEvent::Warning {
                    threshold_secs: threshold.secs,
                    remaining_secs: remaining,
                });
            }
        }

        if remaining == 0 {
            self.state = RunState::Expired;
            events.push(TimerEvent::Expired);
        }

        Tick {
            remaining_secs: remaining,
            events,
        }
    }

    /// Halt the countdown. Safe to call repeatedly, before start, or
    /// after expiry.
    pub fn stop(&mut self) {
        if matches!(self.state, RunState::Running | RunState::Idle) {
            self.state = RunState::Stopped;
        }
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.duration_secs - self.remaining_secs
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn is_expired(&self) -> bool {
        self.state == RunState::Expired
    }
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new(DEFAULT_WARNING_THRESHOLDS_SECS)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
