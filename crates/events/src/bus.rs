//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`EventEnvelope`]s. One
//! bus belongs to one session controller; share it via `Arc<EventBus>`
//! with the tasks that publish on the session's behalf.

use chrono::{DateTime, Utc};
use recruit_core::connection::ConnectionState;
use recruit_core::session::SessionPhase;
use recruit_core::types::DbId;
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Something that happened during a session that the UI reacts to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The controller moved between lifecycle phases.
    PhaseChanged { from: SessionPhase, to: SessionPhase },

    TimerStarted { duration_secs: u64 },

    /// A remaining-time threshold was crossed. Fired once per threshold.
    TimeWarning {
        threshold_secs: u64,
        remaining_secs: u64,
    },

    TimeExpired,

    /// A question became current.
    QuestionPresented {
        question_id: DbId,
        index: usize,
        total: usize,
    },

    ResponseSubmitted { question_id: DbId, elapsed_secs: u64 },

    DraftSaved { question_id: DbId },

    /// Draft persistence failed; the UI shows an "unsaved" indicator.
    DraftSaveFailed { question_id: DbId, error: String },

    /// A device could not be acquired. Actionable, never fatal.
    MediaUnavailable { device: String, reason: String },

    /// Verbatim forward of the peer connection state.
    ConnectionChanged { state: ConnectionState },

    /// The reconnect budget is spent; the UI shows the technical-issues
    /// modal.
    TechnicalIssue { reason: String },

    /// A sequencer guard tripped. Reported to observability, not shown.
    SequenceViolation { error: String },
}

impl SessionEvent {
    /// Dot-separated event name, used as a log field.
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::PhaseChanged { .. } => "session.phase_changed",
            SessionEvent::TimerStarted { .. } => "timer.started",
            SessionEvent::TimeWarning { .. } => "timer.warning",
            SessionEvent::TimeExpired => "timer.expired",
            SessionEvent::QuestionPresented { .. } => "question.presented",
            SessionEvent::ResponseSubmitted { .. } => "question.submitted",
            SessionEvent::DraftSaved { .. } => "draft.saved",
            SessionEvent::DraftSaveFailed { .. } => "draft.save_failed",
            SessionEvent::MediaUnavailable { .. } => "media.unavailable",
            SessionEvent::ConnectionChanged { .. } => "connection.changed",
            SessionEvent::TechnicalIssue { .. } => "connection.technical_issue",
            SessionEvent::SequenceViolation { .. } => "sequence.violation",
        }
    }
}

/// A [`SessionEvent`] stamped with its session and time.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub session_id: DbId,
    pub event: SessionEvent,
    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(session_id: DbId, event: SessionEvent) -> Self {
        Self {
            session_id,
            event,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use recruit_events::bus::{EventBus, SessionEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(42, SessionEvent::TimeExpired);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event for `session_id` to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, session_id: DbId, event: SessionEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(EventEnvelope::new(session_id, event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
