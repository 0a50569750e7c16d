//! Session lifecycle controller.
//!
//! [`SessionController`] owns one candidate session end to end: it loads
//! the questions, brings up media and signaling for interviews, counts
//! down the timer, routes drafts to the auto-saver and answers to the
//! sequencer, and tears everything down in a fixed order.
//!
//! ```text
//! NotStarted -> Connecting -> InProgress -> Completed | Expired | Failed
//!                   \---------------------------------------> Failed
//! ```
//!
//! Time warnings are events on top of `InProgress`, not a phase. Every
//! phase change and notable occurrence is published on the
//! [`EventBus`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use recruit_core::connection::{ConnectionState, MediaFlags, PeerStatus};
use recruit_core::error::CoreError;
use recruit_core::question::{validate_question_set, Answer, Question, QuestionKind, Response};
use recruit_core::sequencer::{Advance, Progress, QuestionSequencer, SequenceError, Submission};
use recruit_core::session::{state_machine, Session, SessionPhase};
use recruit_core::timer::{SessionTimer, TimerEvent};
use recruit_core::types::DbId;
use recruit_events::{EventBus, SessionEvent};
use recruit_signaling::{RelayHandle, RelayUpdate, SignalingError};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::autosave::{DraftAutoSaver, DraftStore, PersistError};
use crate::backend::{BackendError, CompletionReport, SessionBackend};
use crate::config::SessionConfig;
use crate::media::{DeviceKind, MediaAdapter, MediaError};
use crate::speech::{RecognitionResult, SpeechSynthesis, TranscriptBuffer};

/// Countdown resolution.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What kind of session this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// Timed skill assessment. No media or signaling.
    Assessment,
    /// Live interview in a signaling room.
    Interview {
        room_id: String,
        camera: bool,
        microphone: bool,
    },
}

/// Identity and shape of one session, handed to every component.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: DbId,
    pub assessment_id: DbId,
    pub duration_secs: u64,
    pub mode: SessionMode,
}

/// External capabilities the controller drives.
pub struct Collaborators {
    pub backend: Arc<dyn SessionBackend>,
    pub drafts: Arc<dyn DraftStore>,
    pub media: Option<MediaAdapter>,
    pub relay: Option<RelayHandle>,
    pub speech: Option<Arc<dyn SpeechSynthesis>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },

    #[error("Session is not in progress (phase {0:?})")]
    NotInProgress(SessionPhase),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// Candidate actions fed to [`SessionController::run`].
#[derive(Debug, Clone)]
pub enum SessionInput {
    Draft { question_id: DbId, answer: Answer },
    Submit(Submission),
    SaveNow,
    Transcript(RecognitionResult),
    ToggleCamera,
    ToggleMicrophone,
    ToggleSpeaker,
    End,
}

pub struct SessionController {
    context: SessionContext,
    session: Session,
    phase: SessionPhase,
    timer: SessionTimer,
    /// Loaded at start, moved into the sequencer when the session begins.
    questions: Vec<Question>,
    sequencer: Option<QuestionSequencer>,
    autosaver: DraftAutoSaver,
    backend: Arc<dyn SessionBackend>,
    media: Option<MediaAdapter>,
    relay: Option<RelayHandle>,
    speech: Option<Arc<dyn SpeechSynthesis>>,
    transcript: TranscriptBuffer,
    connection: ConnectionState,
    bus: Arc<EventBus>,
    /// Responses the backend did not accept; resent at completion.
    unsent: Vec<Response>,
    completion_reported: bool,
    torn_down: bool,
}

impl SessionController {
    /// Build a controller and spawn its auto-saver. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        context: SessionContext,
        config: &SessionConfig,
        collaborators: Collaborators,
        bus: Arc<EventBus>,
    ) -> Self {
        let autosaver = DraftAutoSaver::spawn(
            context.session_id,
            collaborators.drafts,
            config.autosave_debounce,
            Arc::clone(&bus),
        );
        let session = Session::new(
            context.session_id,
            context.assessment_id,
            context.duration_secs,
        );

        Self {
            session,
            phase: SessionPhase::NotStarted,
            timer: SessionTimer::new(config.warning_thresholds_secs.iter().copied()),
            questions: Vec::new(),
            sequencer: None,
            autosaver,
            backend: collaborators.backend,
            media: collaborators.media,
            relay: collaborators.relay,
            speech: collaborators.speech,
            transcript: TranscriptBuffer::default(),
            connection: ConnectionState::default(),
            bus,
            unsent: Vec::new(),
            completion_reported: false,
            torn_down: false,
            context,
        }
    }

    // -- lifecycle -----------------------------------------------------------

    /// Load questions and move to `Connecting`. Assessments begin at once;
    /// interviews acquire media, join the room and begin when the peer
    /// connects.
    ///
    /// A failed question load leaves the session in `NotStarted`.
    pub async fn start(&mut self) -> Result<(), ControllerError> {
        if self.phase != SessionPhase::NotStarted {
            return Err(ControllerError::InvalidTransition {
                from: self.phase,
                to: SessionPhase::Connecting,
            });
        }

        let questions = self
            .backend
            .fetch_questions(self.context.assessment_id)
            .await?;
        validate_question_set(&questions)?;
        tracing::info!(
            session_id = self.context.session_id,
            questions = questions.len(),
            "Questions loaded",
        );
        self.questions = questions;

        self.transition(SessionPhase::Connecting)?;

        let SessionMode::Interview {
            room_id,
            camera,
            microphone,
        } = self.context.mode.clone()
        else {
            return self.begin().await;
        };

        let flags = match self.media.as_mut() {
            Some(media) => {
                let report = media.acquire(camera, microphone).await;
                for error in &report.errors {
                    self.publish(SessionEvent::MediaUnavailable {
                        device: error.device().name().to_string(),
                        reason: error.to_string(),
                    });
                }
                report.flags
            }
            None => MediaFlags::default(),
        };

        let Some(relay) = self.relay.as_ref() else {
            tracing::warn!(
                session_id = self.context.session_id,
                "Interview has no relay, starting without a peer",
            );
            return self.begin().await;
        };

        let joined = match relay.set_media(flags).await {
            Ok(()) => relay.join(room_id.clone()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = joined {
            self.fail(format!("Could not reach the signaling relay: {e}"))
                .await?;
            return Err(e.into());
        }

        tracing::info!(session_id = self.context.session_id, room_id = %room_id, "Joined interview room");
        Ok(())
    }

    /// Feed a relay update. The first `Connected` begins an interview; a
    /// fatal update fails the session.
    pub async fn on_connection(&mut self, update: RelayUpdate) -> Result<(), ControllerError> {
        match update {
            RelayUpdate::State(state) => {
                self.connection = state;
                self.publish(SessionEvent::ConnectionChanged { state });
                if state.peer == PeerStatus::Connected && self.phase == SessionPhase::Connecting {
                    self.begin().await?;
                }
                Ok(())
            }
            RelayUpdate::Fatal(reason) => {
                if self.phase.is_terminal() {
                    return Ok(());
                }
                self.fail(reason).await
            }
            RelayUpdate::Closed => {
                tracing::debug!(session_id = self.context.session_id, "Relay closed");
                Ok(())
            }
        }
    }

    /// Advance the countdown by one second.
    pub async fn tick(&mut self) -> Result<(), ControllerError> {
        if self.phase != SessionPhase::InProgress {
            return Ok(());
        }
        let tick = self.timer.tick();
        self.apply_timer_events(tick.events).await
    }

    /// End the session early as completed.
    pub async fn end(&mut self) -> Result<(), ControllerError> {
        self.ensure_in_progress()?;
        tracing::info!(session_id = self.context.session_id, "Session ended by candidate");
        self.finish(SessionPhase::Completed).await
    }

    /// Stop timer, release media, close the relay, then stop the
    /// auto-saver. Idempotent; does not change the phase.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.timer.stop();
        if let Some(media) = self.media.as_mut() {
            media.release();
        }
        if let Some(relay) = self.relay.as_mut() {
            relay.close().await;
        }
        self.autosaver.shutdown().await;

        tracing::info!(
            session_id = self.context.session_id,
            phase = self.phase.name(),
            "Session torn down",
        );
    }

    // -- answers -------------------------------------------------------------

    /// Record a partial answer for the current question. Drafts for any
    /// other question are ignored.
    pub async fn record_draft(
        &mut self,
        question_id: DbId,
        answer: Answer,
    ) -> Result<(), ControllerError> {
        self.ensure_in_progress()?;
        if self.current_question().map(|q| q.id) != Some(question_id) {
            tracing::warn!(
                session_id = self.context.session_id,
                question_id,
                "Ignoring draft for a question that is not current",
            );
            return Ok(());
        }
        self.autosaver.on_change(question_id, answer).await?;
        Ok(())
    }

    /// Persist the current draft immediately.
    pub async fn save_now(&mut self) -> Result<(), ControllerError> {
        self.ensure_in_progress()?;
        if let Some(question_id) = self.current_question().map(|q| q.id) {
            self.autosaver.flush_now(question_id).await?;
        }
        Ok(())
    }

    /// Fold a speech recognition result into the current text answer.
    pub async fn record_transcript(
        &mut self,
        result: RecognitionResult,
    ) -> Result<(), ControllerError> {
        self.ensure_in_progress()?;
        if !self.transcript.add_result(result) {
            return Ok(());
        }
        let Some(question_id) = self
            .current_question()
            .filter(|q| q.kind == QuestionKind::Text)
            .map(|q| q.id)
        else {
            return Ok(());
        };
        let text = self.transcript.text();
        self.record_draft(question_id, Answer::Text { text }).await
    }

    /// Submit the final answer for the current question.
    ///
    /// Returns the next question, or `None` once the last answer completes
    /// the session. A sequencer guard failure leaves the session where it
    /// was and is reported to observability.
    pub async fn submit(
        &mut self,
        submission: Submission,
    ) -> Result<Option<Question>, ControllerError> {
        self.ensure_in_progress()?;
        let Some(sequencer) = self.sequencer.as_mut() else {
            return Err(ControllerError::NotInProgress(self.phase));
        };

        let (finished, response) = match sequencer.submit(submission, Utc::now()) {
            Ok(advance) => {
                let finished = matches!(advance, Advance::Finished);
                (finished, sequencer.responses().last().cloned())
            }
            Err(e) => {
                tracing::error!(
                    session_id = self.context.session_id,
                    error = %e,
                    "Sequencer guard violated",
                );
                self.publish(SessionEvent::SequenceViolation {
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if let Some(response) = response {
            self.record_response(response).await;
        }
        self.transcript.clear();

        if finished {
            self.finish(SessionPhase::Completed).await?;
            return Ok(None);
        }

        self.present_current().await;
        Ok(self.current_question().cloned())
    }

    // -- media ---------------------------------------------------------------

    pub async fn toggle_camera(&mut self) -> Result<bool, ControllerError> {
        let media = self.media_mut(DeviceKind::Camera)?;
        let on = media.toggle_camera()?;
        let flags = media.flags();
        self.sync_media(flags).await;
        Ok(on)
    }

    pub async fn toggle_microphone(&mut self) -> Result<bool, ControllerError> {
        let media = self.media_mut(DeviceKind::Microphone)?;
        let on = media.toggle_microphone()?;
        let flags = media.flags();
        self.sync_media(flags).await;
        Ok(on)
    }

    pub async fn toggle_speaker(&mut self) -> bool {
        let Some(media) = self.media.as_mut() else {
            return false;
        };
        let on = media.toggle_speaker();
        let flags = media.flags();
        self.sync_media(flags).await;
        on
    }

    // -- driver --------------------------------------------------------------

    /// Drive the session until it reaches a terminal phase, the input
    /// channel closes, or `cancel` fires. Always tears down before
    /// returning.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<SessionInput>,
        mut updates: Option<mpsc::Receiver<RelayUpdate>>,
        cancel: CancellationToken,
    ) -> Result<SessionPhase, ControllerError> {
        if self.phase == SessionPhase::NotStarted {
            if let Err(e) = self.start().await {
                self.teardown().await;
                return Err(e);
            }
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut ticking = false;

        while !self.phase.is_terminal() {
            if !ticking && self.phase == SessionPhase::InProgress {
                ticker.reset();
                ticking = true;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(session_id = self.context.session_id, "Session cancelled");
                    break;
                }
                _ = ticker.tick(), if ticking => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(session_id = self.context.session_id, error = %e, "Timer tick failed");
                    }
                }
                update = next_update(&mut updates) => match update {
                    Some(update) => {
                        if let Err(e) = self.on_connection(update).await {
                            tracing::error!(session_id = self.context.session_id, error = %e, "Connection update failed");
                        }
                    }
                    None => updates = None,
                },
                input = inputs.recv() => match input {
                    Some(input) => {
                        if let Err(e) = self.handle_input(input).await {
                            tracing::warn!(session_id = self.context.session_id, error = %e, "Input rejected");
                        }
                    }
                    None => {
                        tracing::info!(session_id = self.context.session_id, "Input closed");
                        break;
                    }
                },
            }
        }

        self.teardown().await;
        Ok(self.phase)
    }

    async fn handle_input(&mut self, input: SessionInput) -> Result<(), ControllerError> {
        match input {
            SessionInput::Draft {
                question_id,
                answer,
            } => self.record_draft(question_id, answer).await,
            SessionInput::Submit(submission) => self.submit(submission).await.map(|_| ()),
            SessionInput::SaveNow => self.save_now().await,
            SessionInput::Transcript(result) => self.record_transcript(result).await,
            SessionInput::ToggleCamera => self.toggle_camera().await.map(|_| ()),
            SessionInput::ToggleMicrophone => self.toggle_microphone().await.map(|_| ()),
            SessionInput::ToggleSpeaker => {
                self.toggle_speaker().await;
                Ok(())
            }
            SessionInput::End => self.end().await,
        }
    }

    // -- accessors -----------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.sequencer.as_ref().and_then(QuestionSequencer::current)
    }

    pub fn progress(&self) -> Option<Progress> {
        self.sequencer.as_ref().map(QuestionSequencer::progress)
    }

    pub fn responses(&self) -> &[Response] {
        self.sequencer
            .as_ref()
            .map(QuestionSequencer::responses)
            .unwrap_or_default()
    }

    pub fn remaining_secs(&self) -> u64 {
        self.timer.remaining_secs()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn media_flags(&self) -> MediaFlags {
        self.media
            .as_ref()
            .map(MediaAdapter::flags)
            .unwrap_or_default()
    }

    // -- internals -----------------------------------------------------------

    fn transition(&mut self, to: SessionPhase) -> Result<(), ControllerError> {
        let from = self.phase;
        if !state_machine::can_transition(from, to) {
            return Err(ControllerError::InvalidTransition { from, to });
        }
        self.phase = to;
        tracing::info!(
            session_id = self.context.session_id,
            from = from.name(),
            to = to.name(),
            "Session phase changed",
        );
        self.publish(SessionEvent::PhaseChanged { from, to });
        Ok(())
    }

    /// Enter `InProgress`: start the clock and present the first question.
    async fn begin(&mut self) -> Result<(), ControllerError> {
        self.transition(SessionPhase::InProgress)?;

        let now = Utc::now();
        self.session.begin(now)?;
        let questions = std::mem::take(&mut self.questions);
        self.sequencer = Some(QuestionSequencer::new(questions, now)?);

        let events = self.timer.start(self.context.duration_secs)?;
        self.apply_timer_events(events).await?;

        if self.phase == SessionPhase::InProgress {
            self.present_current().await;
        }
        Ok(())
    }

    async fn apply_timer_events(&mut self, events: Vec<TimerEvent>) -> Result<(), ControllerError> {
        for event in events {
            match event {
                TimerEvent::Started { duration_secs } => {
                    self.publish(SessionEvent::TimerStarted { duration_secs });
                }
                TimerEvent::Warning {
                    threshold_secs,
                    remaining_secs,
                } => {
                    tracing::info!(
                        session_id = self.context.session_id,
                        threshold_secs,
                        remaining_secs,
                        "Time warning",
                    );
                    self.publish(SessionEvent::TimeWarning {
                        threshold_secs,
                        remaining_secs,
                    });
                }
                TimerEvent::Expired => {
                    self.publish(SessionEvent::TimeExpired);
                    self.finish(SessionPhase::Expired).await?;
                }
            }
        }
        Ok(())
    }

    async fn present_current(&mut self) {
        let Some(sequencer) = self.sequencer.as_ref() else {
            return;
        };
        let Some(question) = sequencer.current() else {
            return;
        };
        let (question_id, prompt) = (question.id, question.prompt.clone());
        let (index, total) = (sequencer.index(), sequencer.len());

        self.session.current_index = index;
        self.transcript.clear();
        self.publish(SessionEvent::QuestionPresented {
            question_id,
            index,
            total,
        });

        if let Some(speech) = &self.speech {
            if let Err(e) = speech.speak(&prompt).await {
                tracing::warn!(session_id = self.context.session_id, question_id, error = %e, "Could not speak prompt");
            }
        }
    }

    async fn record_response(&mut self, response: Response) {
        let session_id = self.context.session_id;
        let question_id = response.question_id;

        if let Err(e) = self.autosaver.discard(question_id).await {
            tracing::warn!(session_id, question_id, error = %e, "Could not discard draft");
        }
        self.publish(SessionEvent::ResponseSubmitted {
            question_id,
            elapsed_secs: response.elapsed_secs,
        });

        if let Err(e) = self.backend.submit_response(session_id, &response).await {
            tracing::warn!(session_id, question_id, error = %e, "Response not accepted, will resend at completion");
            self.unsent.push(response);
        }
    }

    /// Move to a terminal outcome, save what is left, report once, tear
    /// down.
    async fn finish(&mut self, outcome: SessionPhase) -> Result<(), ControllerError> {
        self.transition(outcome)?;
        self.timer.stop();
        if let Some(speech) = &self.speech {
            speech.cancel().await;
        }

        if let Some(question_id) = self.current_question().map(|q| q.id) {
            if let Err(e) = self.autosaver.flush_now(question_id).await {
                tracing::warn!(session_id = self.context.session_id, question_id, error = %e, "Final draft not saved");
            }
        }

        self.resend_unsent().await;
        let reported = self.report_completion(outcome).await;
        self.teardown().await;
        reported
    }

    /// Unrecoverable connection loss.
    async fn fail(&mut self, reason: String) -> Result<(), ControllerError> {
        tracing::error!(session_id = self.context.session_id, reason = %reason, "Session failed");
        self.publish(SessionEvent::TechnicalIssue {
            reason: reason.clone(),
        });

        if matches!(self.phase, SessionPhase::Connecting | SessionPhase::InProgress) {
            self.transition(SessionPhase::Failed)?;
        }
        self.timer.stop();

        if let Some(question_id) = self.current_question().map(|q| q.id) {
            if let Err(e) = self.autosaver.flush_now(question_id).await {
                tracing::warn!(session_id = self.context.session_id, question_id, error = %e, "Draft not saved before failure");
            }
        }

        self.teardown().await;
        Ok(())
    }

    async fn resend_unsent(&mut self) {
        let session_id = self.context.session_id;
        for response in std::mem::take(&mut self.unsent) {
            if let Err(e) = self.backend.submit_response(session_id, &response).await {
                tracing::error!(
                    session_id,
                    question_id = response.question_id,
                    error = %e,
                    "Response lost",
                );
            }
        }
    }

    async fn report_completion(&mut self, outcome: SessionPhase) -> Result<(), ControllerError> {
        if self.completion_reported {
            return Ok(());
        }
        self.completion_reported = true;

        let status = outcome.status();
        self.session.finish(status)?;

        let progress = self.progress().unwrap_or(Progress {
            answered: 0,
            total: 0,
        });
        let report = CompletionReport {
            status,
            answered: progress.answered,
            total: progress.total,
            elapsed_secs: self.timer.elapsed_secs(),
            completed_at: Utc::now(),
        };

        tracing::info!(
            session_id = self.context.session_id,
            status = ?status,
            answered = report.answered,
            total = report.total,
            "Reporting session completion",
        );
        self.backend
            .complete_session(self.context.session_id, &report)
            .await?;
        Ok(())
    }

    async fn sync_media(&self, flags: MediaFlags) {
        if let Some(relay) = &self.relay {
            if let Err(e) = relay.set_media(flags).await {
                tracing::warn!(session_id = self.context.session_id, error = %e, "Could not update media flags");
            }
        }
    }

    fn media_mut(&mut self, kind: DeviceKind) -> Result<&mut MediaAdapter, MediaError> {
        self.media
            .as_mut()
            .ok_or_else(|| MediaError::DeviceUnavailable(kind, "no media in this session".into()))
    }

    fn ensure_in_progress(&self) -> Result<(), ControllerError> {
        if self.phase == SessionPhase::InProgress {
            Ok(())
        } else {
            Err(ControllerError::NotInProgress(self.phase))
        }
    }

    fn publish(&self, event: SessionEvent) {
        self.bus.publish(self.context.session_id, event);
    }
}

async fn next_update(updates: &mut Option<mpsc::Receiver<RelayUpdate>>) -> Option<RelayUpdate> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
