//! Session record and lifecycle state machines.
//!
//! Two related enums live here:
//!
//! - [`SessionStatus`] is what the backend stores (`not_started`,
//!   `in_progress`, `completed`, `expired`).
//! - [`SessionPhase`] is the controller's finer-grained view, which adds
//!   `Connecting` and `Failed`.
//!
//! Both have terminal sink states; [`state_machine`] validates moves
//! between phases.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Status (persisted)
// ---------------------------------------------------------------------------

/// Persisted status of a session as the backend sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Completed,
    Expired,
}

impl SessionStatus {
    /// `true` for statuses with no way out.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }
}

// ---------------------------------------------------------------------------
// Phase (controller)
// ---------------------------------------------------------------------------

/// Controller lifecycle phase.
///
/// Time warnings are events layered on `InProgress`, not a phase of
/// their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NotStarted,
    Connecting,
    InProgress,
    Completed,
    Expired,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Expired | SessionPhase::Failed
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionPhase::NotStarted => "NotStarted",
            SessionPhase::Connecting => "Connecting",
            SessionPhase::InProgress => "InProgress",
            SessionPhase::Completed => "Completed",
            SessionPhase::Expired => "Expired",
            SessionPhase::Failed => "Failed",
        }
    }

    /// Status reported to the backend for this phase.
    ///
    /// A failed session stays `in_progress` on the backend so that a
    /// manual reconnect can resume it.
    pub fn status(self) -> SessionStatus {
        match self {
            SessionPhase::NotStarted | SessionPhase::Connecting => SessionStatus::NotStarted,
            SessionPhase::InProgress | SessionPhase::Failed => SessionStatus::InProgress,
            SessionPhase::Completed => SessionStatus::Completed,
            SessionPhase::Expired => SessionStatus::Expired,
        }
    }
}

/// Transition rules between [`SessionPhase`]s.
pub mod state_machine {
    use super::SessionPhase;
    use crate::error::CoreError;

    /// Phases reachable from `from`. Terminal phases return an empty slice.
    pub fn valid_transitions(from: SessionPhase) -> &'static [SessionPhase] {
        use SessionPhase::*;
        match from {
            NotStarted => &[Connecting],
            // Connecting -> InProgress, Failed
            Connecting => &[InProgress, Failed],
            // InProgress -> Completed, Expired, Failed
            InProgress => &[Completed, Expired, Failed],
            Completed | Expired | Failed => &[],
        }
    }

    pub fn can_transition(from: SessionPhase, to: SessionPhase) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a phase change, returning [`CoreError::InvalidTransition`]
    /// for illegal ones.
    pub fn validate_transition(from: SessionPhase, to: SessionPhase) -> Result<(), CoreError> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: from.name(),
                to: to.name(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One timed attempt at an assessment or interview by a single candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: DbId,
    pub assessment_id: DbId,
    pub status: SessionStatus,
    pub started_at: Option<Timestamp>,
    /// Time budget for the whole session, in seconds.
    pub duration_secs: u64,
    pub current_index: usize,
}

impl Session {
    pub fn new(id: DbId, assessment_id: DbId, duration_secs: u64) -> Self {
        Self {
            id,
            assessment_id,
            status: SessionStatus::NotStarted,
            started_at: None,
            duration_secs,
            current_index: 0,
        }
    }

    /// Mark the session as running from `now`.
    pub fn begin(&mut self, now: Timestamp) -> Result<(), CoreError> {
        if self.status != SessionStatus::NotStarted {
            return Err(CoreError::Validation(format!(
                "Session {} cannot start from {:?}",
                self.id, self.status
            )));
        }
        self.status = SessionStatus::InProgress;
        self.started_at = Some(now);
        Ok(())
    }

    /// Move to a terminal status. Repeated calls with a terminal status
    /// already set are rejected so the outcome is recorded once.
    pub fn finish(&mut self, status: SessionStatus) -> Result<(), CoreError> {
        if !status.is_terminal() {
            return Err(CoreError::Validation(format!(
                "{status:?} is not a terminal status"
            )));
        }
        if self.status.is_terminal() {
            return Err(CoreError::Validation(format!(
                "Session {} already finished as {:?}",
                self.id, self.status
            )));
        }
        self.status = status;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
