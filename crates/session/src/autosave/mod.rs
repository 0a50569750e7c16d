//! Debounced draft persistence.
//!
//! [`DraftAutoSaver`] is a background actor that owns a [`DraftTracker`]
//! and persists drafts through a [`DraftStore`]. Callers talk to it over a
//! command channel, so typing never waits on the network.

pub mod tracker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use recruit_core::question::{Answer, Draft};
use recruit_core::types::DbId;
use recruit_events::{EventBus, SessionEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

pub use tracker::{Completion, DraftTracker, FlushDecision, PersistJob};

/// Command channel capacity.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Errors from draft persistence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    /// The store rejected or could not receive the draft.
    #[error("Draft persistence failed: {0}")]
    Failed(String),

    /// The auto-saver task is no longer running.
    #[error("Auto-saver has stopped")]
    Stopped,
}

/// Where drafts go.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn persist(&self, session_id: DbId, draft: &Draft) -> Result<(), PersistError>;
}

type FlushReply = oneshot::Sender<Result<(), PersistError>>;

enum Command {
    Change { question_id: DbId, answer: Answer },
    Flush { question_id: DbId, reply: FlushReply },
    Discard { question_id: DbId },
    Shutdown,
}

/// Handle to the auto-saver task.
pub struct DraftAutoSaver {
    commands: mpsc::Sender<Command>,
    task: Option<JoinHandle<()>>,
}

impl DraftAutoSaver {
    /// Spawn the actor. Must be called from within a Tokio runtime.
    pub fn spawn(
        session_id: DbId,
        store: Arc<dyn DraftStore>,
        window: Duration,
        bus: Arc<EventBus>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let worker = Worker {
            session_id,
            store,
            bus,
            tracker: DraftTracker::new(window),
            jobs: JoinSet::new(),
            waiters: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(rx));
        Self {
            commands: tx,
            task: Some(task),
        }
    }

    /// Record a partial answer; persisted once the debounce window closes.
    pub async fn on_change(&self, question_id: DbId, answer: Answer) -> Result<(), PersistError> {
        self.send(Command::Change {
            question_id,
            answer,
        })
        .await
    }

    /// Persist immediately and wait for the outcome. Returns `Ok` when
    /// there is nothing unsaved.
    pub async fn flush_now(&self, question_id: DbId) -> Result<(), PersistError> {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Flush { question_id, reply }).await?;
        outcome.await.map_err(|_| PersistError::Stopped)?
    }

    /// Drop a question's draft after its answer was submitted.
    pub async fn discard(&self, question_id: DbId) -> Result<(), PersistError> {
        self.send(Command::Discard { question_id }).await
    }

    /// Stop the actor, letting in-flight persists finish. Idempotent.
    pub async fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Auto-saver task panicked");
            }
        }
    }

    async fn send(&self, command: Command) -> Result<(), PersistError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PersistError::Stopped)
    }
}

type JobResult = (DbId, u64, Result<(), PersistError>);

struct Worker {
    session_id: DbId,
    store: Arc<dyn DraftStore>,
    bus: Arc<EventBus>,
    tracker: DraftTracker,
    jobs: JoinSet<JobResult>,
    waiters: HashMap<DbId, Vec<FlushReply>>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!(session_id = self.session_id, "Auto-saver started");

        loop {
            let deadline = self.tracker.next_deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Change { question_id, answer }) => {
                        self.tracker.on_change(question_id, answer, Instant::now());
                    }
                    Some(Command::Flush { question_id, reply }) => {
                        match self.tracker.flush(question_id) {
                            FlushDecision::Clean => {
                                let _ = reply.send(Ok(()));
                            }
                            FlushDecision::Start(job) => {
                                self.waiters.entry(question_id).or_default().push(reply);
                                self.start(job);
                            }
                            FlushDecision::Deferred => {
                                self.waiters.entry(question_id).or_default().push(reply);
                            }
                        }
                    }
                    Some(Command::Discard { question_id }) => {
                        self.tracker.discard(question_id);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => {
                    match joined {
                        Ok((question_id, revision, result)) => {
                            self.finished(question_id, revision, result);
                        }
                        Err(e) => tracing::error!(error = %e, "Draft persist task failed"),
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for job in self.tracker.take_due(Instant::now()) {
                        self.start(job);
                    }
                }
            }
        }

        // Let in-flight persists land before stopping.
        while let Some(joined) = self.jobs.join_next().await {
            if let Ok((question_id, revision, result)) = joined {
                self.finished(question_id, revision, result);
            }
        }
        self.jobs.abort_all();
        for (_, replies) in self.waiters.drain() {
            for reply in replies {
                let _ = reply.send(Err(PersistError::Stopped));
            }
        }

        tracing::debug!(session_id = self.session_id, "Auto-saver stopped");
    }

    fn start(&mut self, job: PersistJob) {
        let store = Arc::clone(&self.store);
        let session_id = self.session_id;
        tracing::debug!(
            session_id,
            question_id = job.question_id,
            revision = job.revision,
            "Persisting draft",
        );

        self.jobs.spawn(async move {
            let draft = Draft {
                question_id: job.question_id,
                answer: job.answer,
                saved_at: Some(Utc::now()),
            };
            let result = store.persist(session_id, &draft).await;
            (job.question_id, job.revision, result)
        });
    }

    fn finished(&mut self, question_id: DbId, revision: u64, result: Result<(), PersistError>) {
        let outcome = result.clone().map_err(|e| e.to_string());
        let completion = self
            .tracker
            .complete(question_id, revision, outcome, Instant::now());

        match &result {
            Ok(()) => {
                tracing::debug!(session_id = self.session_id, question_id, "Draft saved");
                self.bus
                    .publish(self.session_id, SessionEvent::DraftSaved { question_id });
            }
            Err(e) => {
                tracing::warn!(
                    session_id = self.session_id,
                    question_id,
                    error = %e,
                    "Draft save failed",
                );
                self.bus.publish(
                    self.session_id,
                    SessionEvent::DraftSaveFailed {
                        question_id,
                        error: e.to_string(),
                    },
                );
            }
        }

        match completion.follow_up {
            // Flush callers wait for the follow-up, which carries the
            // latest answer.
            Some(job) => self.start(job),
            None => {
                if let Some(replies) = self.waiters.remove(&question_id) {
                    for reply in replies {
                        let _ = reply.send(result.clone());
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    /// Records drafts; fails the first `failures` calls; each call takes
    /// `latency` of (paused) time.
    struct MemoryStore {
        saved: Mutex<Vec<Draft>>,
        failures: Mutex<u32>,
        latency: Duration,
    }

    impl MemoryStore {
        fn new(failures: u32, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                saved: Mutex::new(Vec::new()),
                failures: Mutex::new(failures),
                latency,
            })
        }

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
    impl DraftStore for MemoryStore {
        async fn persist(&self, _session_id: DbId, draft: &Draft) -> Result<(), PersistError> {
            tokio::time::sleep(self.latency).await;
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(PersistError::Failed("503 Service Unavailable".into()));
                }
            }
            self.saved.lock().unwrap().push(draft.clone());
            Ok(())
        }
    }

    fn text(s: &str) -> Answer {
        Answer::Text { text: s.into() }
    }

    fn spawn(store: Arc<MemoryStore>) -> (DraftAutoSaver, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        let saver = DraftAutoSaver::spawn(7, store, WINDOW, Arc::clone(&bus));
        (saver, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_persists_once() {
        let store = MemoryStore::new(0, Duration::ZERO);
        let (mut saver, _bus) = spawn(Arc::clone(&store));

        for i in 0..5 {
            saver.on_change(1, text(&format!("draft {i}"))).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert!(store.answers().is_empty(), "window still open");

        tokio::time::sleep(WINDOW).await;
        assert_eq!(store.answers(), vec![text("draft 4")]);

        tokio::time::sleep(WINDOW * 3).await;
        assert_eq!(store.answers().len(), 1);

        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_persist_reports_and_flush_retries() {
        let store = MemoryStore::new(1, Duration::ZERO);
        let (mut saver, bus) = spawn(Arc::clone(&store));
        let mut events = bus.subscribe();

        saver.on_change(3, text("partial")).await.unwrap();
        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;

        let envelope = events.recv().await.unwrap();
        assert_matches!(
            envelope.event,
            SessionEvent::DraftSaveFailed { question_id: 3, .. }
        );
        assert!(store.answers().is_empty());

        // Nothing retries on its own.
        tokio::time::sleep(WINDOW * 2).await;
        assert!(store.answers().is_empty());

        saver.flush_now(3).await.unwrap();
        assert_eq!(store.answers(), vec![text("partial")]);
        assert_matches!(
            events.recv().await.unwrap().event,
            SessionEvent::DraftSaved { question_id: 3 }
        );

        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mid_flight_changes_coalesce() {
        let store = MemoryStore::new(0, Duration::from_secs(5));
        let (mut saver, _bus) = spawn(Arc::clone(&store));

        saver.on_change(1, text("a")).await.unwrap();
        // Window closes at 30s; the persist runs until 35s.
        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;
        for s in ["ab", "abc", "abcd"] {
            saver.on_change(1, text(s)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.answers(), vec![text("a"), text("abcd")]);

        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_skips_window() {
        let store = MemoryStore::new(0, Duration::ZERO);
        let (mut saver, _bus) = spawn(Arc::clone(&store));

        saver.on_change(2, text("x = 1")).await.unwrap();
        saver.flush_now(2).await.unwrap();
        assert_eq!(store.answers(), vec![text("x = 1")]);

        // Window was cancelled; no second persist.
        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(store.answers().len(), 1);

        // Clean question flushes trivially.
        saver.flush_now(2).await.unwrap();
        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn discard_cancels_pending_save() {
        let store = MemoryStore::new(0, Duration::ZERO);
        let (mut saver, _bus) = spawn(Arc::clone(&store));

        saver.on_change(4, text("final")).await.unwrap();
        saver.discard(4).await.unwrap();
        tokio::time::sleep(WINDOW * 2).await;
        assert!(store.answers().is_empty());

        saver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_after_shutdown_fail() {
        let store = MemoryStore::new(0, Duration::ZERO);
        let (mut saver, _bus) = spawn(store);

        saver.shutdown().await;
        saver.shutdown().await;
        assert_eq!(
            saver.on_change(1, text("late")).await,
            Err(PersistError::Stopped)
        );
    }
}
