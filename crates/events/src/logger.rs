//! Observability sink for session events.
//!
//! [`EventLogger`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and writes every [`EventEnvelope`] to `tracing`. Failures the
//! candidate never sees as prose (sequencer guard violations, exhausted
//! reconnects) are logged at `error` so they reach alerting. The loop
//! exits when the bus is dropped.

use tokio::sync::broadcast;

use crate::bus::{EventEnvelope, SessionEvent};

/// Background service that logs session events.
pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the channel closes.
    pub async fn run(mut receiver: broadcast::Receiver<EventEnvelope>) {
        loop {
            match receiver.recv().await {
                Ok(envelope) => Self::log(&envelope),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Event bus closed, logger shutting down");
                    break;
                }
            }
        }
    }

    fn log(envelope: &EventEnvelope) {
        let session_id = envelope.session_id;
        let event_type = envelope.event.event_type();

        match &envelope.event {
            SessionEvent::SequenceViolation { error } => {
                tracing::error!(session_id, event_type, error = %error, "Sequencer guard violated");
            }
            SessionEvent::TechnicalIssue { reason } => {
                tracing::error!(session_id, event_type, reason = %reason, "Session connection lost");
            }
            SessionEvent::DraftSaveFailed { question_id, error } => {
                tracing::warn!(session_id, event_type, question_id, error = %error, "Draft not saved");
            }
            SessionEvent::MediaUnavailable { device, reason } => {
                tracing::warn!(session_id, event_type, device = %device, reason = %reason, "Media device unavailable");
            }
            SessionEvent::ConnectionChanged { state } => {
                tracing::debug!(session_id, event_type, peer = ?state.peer, "Connection state changed");
            }
            SessionEvent::DraftSaved { question_id } => {
                tracing::debug!(session_id, event_type, question_id, "Draft saved");
            }
            other => {
                tracing::info!(session_id, event_type, event = ?other, "Session event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn logger_exits_when_bus_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(EventLogger::run(bus.subscribe()));

        bus.publish(1, SessionEvent::TimeExpired);
        bus.publish(
            1,
            SessionEvent::SequenceViolation {
                error: "stale submit".into(),
            },
        );
        drop(bus);

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("logger should stop once the bus closes")
            .expect("logger task should not panic");
    }
}
