//! Integration tests for the session controller.
//!
//! Each test wires a [`SessionController`] to in-memory stand-ins for the
//! REST backend, the draft store, media devices, the relay task and
//! speech synthesis, then drives it through a full lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use recruit_core::connection::{ConnectionState, PeerStatus};
use recruit_core::question::{Answer, Draft, Question, QuestionKind, Response};
use recruit_core::sequencer::{SequenceError, Submission};
use recruit_core::session::{SessionPhase, SessionStatus};
use recruit_core::types::DbId;
use recruit_events::{EventBus, EventEnvelope, SessionEvent};
use recruit_session::media::{DeviceKind, MediaDevices, MediaError, TrackId};
use recruit_session::speech::SpeechError;
use recruit_session::{
    BackendError, Collaborators, CompletionReport, ControllerError, DraftStore, MediaAdapter,
    PersistError, RecognitionResult, SessionBackend, SessionConfig, SessionContext,
    SessionController, SessionInput, SessionMode, SpeechSynthesis,
};
use recruit_signaling::{RelayCommand, RelayHandle, RelayUpdate};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const SESSION_ID: DbId = 900;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    async fn wait_for(&self, entry: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.position(entry).is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {entry}, log: {:?}", self.entries()));
    }
}

#[derive(Default)]
struct MockBackend {
    questions: Vec<Question>,
    fail_fetch: bool,
    reject_next_response: AtomicBool,
    responses: Mutex<Vec<Response>>,
    completions: Mutex<Vec<CompletionReport>>,
}

impl MockBackend {
    fn with_questions(questions: Vec<Question>) -> Self {
        Self {
            questions,
            ..Default::default()
        }
    }

    fn response_ids(&self) -> Vec<DbId> {
        self.responses
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.question_id)
            .collect()
    }

    fn completions(&self) -> Vec<CompletionReport> {
        self.completions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn fetch_questions(&self, _assessment_id: DbId) -> Result<Vec<Question>, BackendError> {
        if self.fail_fetch {
            return Err(BackendError::Api {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(self.questions.clone())
    }

    async fn submit_response(
        &self,
        _session_id: DbId,
        response: &Response,
    ) -> Result<(), BackendError> {
        if self.reject_next_response.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Api {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        self.responses.lock().unwrap().push(response.clone());
        Ok(())
    }

    async fn complete_session(
        &self,
        _session_id: DbId,
        report: &CompletionReport,
    ) -> Result<(), BackendError> {
        self.completions.lock().unwrap().push(report.clone());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryDrafts {
    saved: Mutex<Vec<Draft>>,
}

impl MemoryDrafts {
    fn answers(&self) -> Vec<Answer> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.answer.clone())
            .collect()
    }
}

#[async_trait]
impl DraftStore for MemoryDrafts {
    async fn persist(&self, _session_id: DbId, draft: &Draft) -> Result<(), PersistError> {
        self.saved.lock().unwrap().push(draft.clone());
        Ok(())
    }
}

struct FakeDevices {
    deny_camera: bool,
    log: CallLog,
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn request(&mut self, kind: DeviceKind) -> Result<TrackId, MediaError> {
        if kind == DeviceKind::Camera && self.deny_camera {
            return Err(MediaError::PermissionDenied(kind));
        }
        Ok(TrackId(kind.name().into()))
    }

    fn set_enabled(&mut self, track: &TrackId, enabled: bool) {
        self.log.push(format!("media:enabled:{}:{enabled}", track.0));
    }

    fn stop(&mut self, track: &TrackId) {
        self.log.push(format!("media:stop:{}", track.0));
    }
}

#[derive(Default)]
struct FakeSpeech {
    spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesis for FakeSpeech {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn cancel(&self) {}
}

/// Stand-in for the relay task: records every command it receives.
fn fake_relay(log: CallLog) -> RelayHandle {
    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                RelayCommand::Join(room) => log.push(format!("relay:join:{room}")),
                RelayCommand::SetMedia(flags) => {
                    log.push(format!("relay:media:{}:{}", flags.camera, flags.microphone))
                }
                RelayCommand::Close => log.push("relay:close"),
            }
        }
    });
    RelayHandle::new(tx)
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn question(id: DbId, kind: QuestionKind) -> Question {
    Question {
        id,
        position: id as u32,
        prompt: format!("Question {id}"),
        kind,
        choices: (kind == QuestionKind::MultipleChoice)
            .then(|| vec!["A".to_string(), "B".to_string(), "C".to_string()]),
        test_cases: None,
        starter_code: None,
        points: 10,
    }
}

fn mixed_questions() -> Vec<Question> {
    vec![
        question(1, QuestionKind::MultipleChoice),
        question(2, QuestionKind::Text),
        question(3, QuestionKind::Coding),
    ]
}

fn answer_for(kind: QuestionKind) -> Answer {
    match kind {
        QuestionKind::MultipleChoice => Answer::MultipleChoice { selected: vec![1] },
        QuestionKind::Text => Answer::Text {
            text: "Because it scales".into(),
        },
        QuestionKind::Coding => Answer::Coding {
            language: Some("rust".into()),
            source: "fn main() {}".into(),
        },
    }
}

fn submission_for(question: &Question) -> Submission {
    Submission {
        question_id: question.id,
        answer: answer_for(question.kind),
    }
}

struct Fixture {
    controller: SessionController,
    backend: Arc<MockBackend>,
    drafts: Arc<MemoryDrafts>,
    events: broadcast::Receiver<EventEnvelope>,
}

fn assessment(backend: MockBackend, duration_secs: u64, thresholds: Vec<u64>) -> Fixture {
    assessment_with_speech(backend, duration_secs, thresholds, None)
}

fn assessment_with_speech(
    backend: MockBackend,
    duration_secs: u64,
    thresholds: Vec<u64>,
    speech: Option<Arc<dyn SpeechSynthesis>>,
) -> Fixture {
    let backend = Arc::new(backend);
    let drafts = Arc::new(MemoryDrafts::default());
    let bus = Arc::new(EventBus::default());
    let events = bus.subscribe();

    let mut config = SessionConfig::with_backend("http://backend.test");
    config.warning_thresholds_secs = thresholds;

    let context = SessionContext {
        session_id: SESSION_ID,
        assessment_id: 1,
        duration_secs,
        mode: SessionMode::Assessment,
    };
    let collaborators = Collaborators {
        backend: backend.clone(),
        drafts: drafts.clone(),
        media: None,
        relay: None,
        speech,
    };

    Fixture {
        controller: SessionController::new(context, &config, collaborators, bus),
        backend,
        drafts,
        events,
    }
}

fn drain(events: &mut broadcast::Receiver<EventEnvelope>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        assert_eq!(envelope.session_id, SESSION_ID);
        out.push(envelope.event);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// An assessment starts immediately, needs one submit per question and
/// reports completion once.
#[tokio::test]
async fn assessment_runs_to_completion() {
    let speech = Arc::new(FakeSpeech::default());
    let mut f = assessment_with_speech(
        MockBackend::with_questions(mixed_questions()),
        1800,
        vec![300, 60],
        Some(speech.clone()),
    );

    f.controller.start().await.unwrap();
    assert_eq!(f.controller.phase(), SessionPhase::InProgress);

    for expected_next in [Some(2), Some(3), None] {
        let current = f.controller.current_question().cloned().unwrap();
        let next = f.controller.submit(submission_for(&current)).await.unwrap();
        assert_eq!(next.map(|q| q.id), expected_next);
    }

    assert_eq!(f.controller.phase(), SessionPhase::Completed);
    assert_eq!(f.backend.response_ids(), vec![1, 2, 3]);

    let completions = f.backend.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, SessionStatus::Completed);
    assert_eq!(completions[0].answered, 3);
    assert_eq!(completions[0].total, 3);

    assert_eq!(
        *speech.spoken.lock().unwrap(),
        vec!["Question 1", "Question 2", "Question 3"]
    );

    let events = drain(&mut f.events);
    let phases: Vec<SessionPhase> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            SessionPhase::Connecting,
            SessionPhase::InProgress,
            SessionPhase::Completed
        ]
    );

    let extra = Submission {
        question_id: 3,
        answer: answer_for(QuestionKind::Coding),
    };
    assert_matches!(
        f.controller.submit(extra).await,
        Err(ControllerError::NotInProgress(SessionPhase::Completed))
    );
}

/// A submit for the wrong question is rejected, reported, and leaves the
/// session where it was.
#[tokio::test]
async fn mismatched_submit_is_reported() {
    let mut f = assessment(MockBackend::with_questions(mixed_questions()), 1800, vec![]);
    f.controller.start().await.unwrap();
    drain(&mut f.events);

    let wrong = Submission {
        question_id: 2,
        answer: answer_for(QuestionKind::Text),
    };
    assert_matches!(
        f.controller.submit(wrong).await,
        Err(ControllerError::Sequence(SequenceError::MismatchedQuestion {
            submitted: 2,
            current: 1
        }))
    );

    assert_eq!(f.controller.phase(), SessionPhase::InProgress);
    assert_eq!(f.controller.current_question().map(|q| q.id), Some(1));
    assert!(f.backend.response_ids().is_empty());
    assert_matches!(
        drain(&mut f.events).as_slice(),
        [SessionEvent::SequenceViolation { .. }]
    );

    f.controller.teardown().await;
}

/// Expiry fires the warning once, saves the open draft and reports an
/// expired session.
#[tokio::test]
async fn expiry_saves_draft_and_reports_once() {
    let questions = vec![question(1, QuestionKind::Text), question(2, QuestionKind::Text)];
    let mut f = assessment(MockBackend::with_questions(questions), 5, vec![3]);
    f.controller.start().await.unwrap();

    let partial = Answer::Text {
        text: "half an answer".into(),
    };
    f.controller.record_draft(1, partial.clone()).await.unwrap();

    for _ in 0..5 {
        f.controller.tick().await.unwrap();
    }
    assert_eq!(f.controller.phase(), SessionPhase::Expired);

    // Later ticks are no-ops.
    f.controller.tick().await.unwrap();

    assert_eq!(f.drafts.answers(), vec![partial]);
    let completions = f.backend.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, SessionStatus::Expired);
    assert_eq!(completions[0].answered, 0);

    let events = drain(&mut f.events);
    let warnings: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::TimeWarning { .. }))
        .collect();
    assert_eq!(
        warnings,
        vec![&SessionEvent::TimeWarning {
            threshold_secs: 3,
            remaining_secs: 3
        }]
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::TimeExpired))
            .count(),
        1
    );
}

/// A draft for a question that is no longer current is ignored.
#[tokio::test]
async fn stale_draft_ignored() {
    let mut f = assessment(MockBackend::with_questions(mixed_questions()), 1800, vec![]);
    f.controller.start().await.unwrap();

    let first = f.controller.current_question().cloned().unwrap();
    f.controller.submit(submission_for(&first)).await.unwrap();

    f.controller
        .record_draft(1, answer_for(QuestionKind::MultipleChoice))
        .await
        .unwrap();
    f.controller.save_now().await.unwrap();
    assert!(f.drafts.answers().is_empty());

    f.controller.teardown().await;
}

/// Spoken answers become the text draft of the current question.
#[tokio::test]
async fn transcript_becomes_text_draft() {
    let questions = vec![question(7, QuestionKind::Text)];
    let mut f = assessment(MockBackend::with_questions(questions), 1800, vec![]);
    f.controller.start().await.unwrap();

    for (text, is_final) in [("I would", false), ("I would cache it.", true)] {
        f.controller
            .record_transcript(RecognitionResult {
                text: text.into(),
                is_final,
                confidence: 0.9,
            })
            .await
            .unwrap();
    }
    f.controller.save_now().await.unwrap();

    assert_eq!(
        f.drafts.answers(),
        vec![Answer::Text {
            text: "I would cache it.".into()
        }]
    );

    f.controller.teardown().await;
}

/// A response the backend rejects is resent when the session completes.
#[tokio::test]
async fn rejected_response_resent_at_completion() {
    let backend = MockBackend::with_questions(vec![
        question(1, QuestionKind::Text),
        question(2, QuestionKind::Text),
    ]);
    backend.reject_next_response.store(true, Ordering::SeqCst);
    let mut f = assessment(backend, 1800, vec![]);
    f.controller.start().await.unwrap();

    for _ in 0..2 {
        let current = f.controller.current_question().cloned().unwrap();
        f.controller.submit(submission_for(&current)).await.unwrap();
    }

    assert_eq!(f.backend.response_ids(), vec![2, 1]);
    assert_eq!(f.backend.completions().len(), 1);
}

/// A failed question load leaves the session unstarted.
#[tokio::test]
async fn failed_fetch_leaves_session_unstarted() {
    let backend = MockBackend {
        fail_fetch: true,
        ..Default::default()
    };
    let mut f = assessment(backend, 1800, vec![]);

    assert_matches!(
        f.controller.start().await,
        Err(ControllerError::Backend(BackendError::Api { status: 503, .. }))
    );
    assert_eq!(f.controller.phase(), SessionPhase::NotStarted);

    f.controller.teardown().await;
}

/// Camera denied with microphone granted continues audio-only; the relay
/// learns the flags before joining. A fatal relay update fails the
/// session and tears down media before the relay.
#[tokio::test]
async fn interview_audio_only_then_fatal() {
    let log = CallLog::default();
    let backend = Arc::new(MockBackend::with_questions(mixed_questions()));
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();

    let context = SessionContext {
        session_id: SESSION_ID,
        assessment_id: 1,
        duration_secs: 1800,
        mode: SessionMode::Interview {
            room_id: "room-9".into(),
            camera: true,
            microphone: true,
        },
    };
    let collaborators = Collaborators {
        backend: backend.clone(),
        drafts: Arc::new(MemoryDrafts::default()),
        media: Some(MediaAdapter::new(Box::new(FakeDevices {
            deny_camera: true,
            log: log.clone(),
        }))),
        relay: Some(fake_relay(log.clone())),
        speech: None,
    };
    let config = SessionConfig::with_backend("http://backend.test");
    let mut controller = SessionController::new(context, &config, collaborators, bus);

    controller.start().await.unwrap();
    assert_eq!(controller.phase(), SessionPhase::Connecting);
    assert!(!controller.media_flags().camera);
    assert!(controller.media_flags().microphone);

    log.wait_for("relay:join:room-9").await;
    assert!(log.position("relay:media:false:true") < log.position("relay:join:room-9"));

    controller
        .on_connection(RelayUpdate::State(ConnectionState {
            peer: PeerStatus::Connected,
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(controller.phase(), SessionPhase::InProgress);
    assert_eq!(controller.current_question().map(|q| q.id), Some(1));

    controller
        .on_connection(RelayUpdate::Fatal("reconnect budget spent".into()))
        .await
        .unwrap();
    assert_eq!(controller.phase(), SessionPhase::Failed);

    log.wait_for("relay:close").await;
    assert!(log.position("media:stop:microphone") < log.position("relay:close"));

    // Failed sessions stay open on the backend.
    assert!(backend.completions().is_empty());

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::MediaUnavailable { device, .. } if device == "camera"
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::TechnicalIssue { .. })));

    // Teardown already ran; a second call is harmless.
    controller.teardown().await;
}

/// `run` ticks the clock and stops at expiry.
#[tokio::test(start_paused = true)]
async fn run_expires_without_input() {
    let f = assessment(
        MockBackend::with_questions(mixed_questions()),
        3,
        vec![],
    );
    let backend = f.backend.clone();
    let (_inputs_tx, inputs) = mpsc::channel(8);

    let phase = f
        .controller
        .run(inputs, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(phase, SessionPhase::Expired);
    assert_eq!(backend.completions()[0].status, SessionStatus::Expired);
}

/// `run` routes candidate inputs until the last submit completes the
/// session.
#[tokio::test(start_paused = true)]
async fn run_routes_inputs_to_completion() {
    let questions = vec![question(1, QuestionKind::Text)];
    let f = assessment(MockBackend::with_questions(questions), 1800, vec![]);
    let backend = f.backend.clone();
    let (inputs_tx, inputs) = mpsc::channel(8);

    inputs_tx
        .send(SessionInput::Draft {
            question_id: 1,
            answer: answer_for(QuestionKind::Text),
        })
        .await
        .unwrap();
    inputs_tx
        .send(SessionInput::Submit(Submission {
            question_id: 1,
            answer: answer_for(QuestionKind::Text),
        }))
        .await
        .unwrap();

    let phase = f
        .controller
        .run(inputs, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(phase, SessionPhase::Completed);
    assert_eq!(backend.response_ids(), vec![1]);
}

/// Cancelling `run` tears down without reporting completion.
#[tokio::test(start_paused = true)]
async fn run_cancel_leaves_session_open() {
    let f = assessment(MockBackend::with_questions(mixed_questions()), 1800, vec![]);
    let backend = f.backend.clone();
    let (_inputs_tx, inputs) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(f.controller.run(inputs, None, cancel.clone()));
    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel.cancel();

    let phase = task.await.unwrap().unwrap();
    assert_eq!(phase, SessionPhase::InProgress);
    assert!(backend.completions().is_empty());
}
