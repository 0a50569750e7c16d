//! Debounce bookkeeping for draft persistence.
//!
//! [`DraftTracker`] decides *when* a draft should be persisted; it never
//! performs the persist itself. Per question it tracks:
//!
//! - `dirty`: the latest answer has not been saved.
//! - `deadline`: when the debounce window closes.
//! - `in_flight`: the revision currently being persisted, if any.
//! - `follow_up`: something happened mid-flight that needs exactly one
//!   more persist once the in-flight call resolves.
//!
//! Times are `tokio::time::Instant` so the actor can run under paused
//! test time.

use std::collections::HashMap;
use std::time::Duration;

use recruit_core::question::Answer;
use recruit_core::types::DbId;
use tokio::time::Instant;

/// A persist the caller should start now.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistJob {
    pub question_id: DbId,
    pub answer: Answer,
    pub revision: u64,
}

/// Outcome of [`DraftTracker::flush`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlushDecision {
    /// Nothing unsaved.
    Clean,
    /// Persist this job immediately.
    Start(PersistJob),
    /// A persist is in flight; a follow-up has been scheduled.
    Deferred,
}

/// Outcome of [`DraftTracker::complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The completed call saved the latest revision.
    pub saved: bool,
    /// Start this follow-up persist immediately.
    pub follow_up: Option<PersistJob>,
}

#[derive(Debug)]
struct Entry {
    answer: Answer,
    revision: u64,
    dirty: bool,
    deadline: Option<Instant>,
    in_flight: Option<u64>,
    follow_up: bool,
    last_saved: Option<Instant>,
    last_error: Option<String>,
}

impl Entry {
    fn start(&mut self, question_id: DbId) -> PersistJob {
        self.deadline = None;
        self.in_flight = Some(self.revision);
        PersistJob {
            question_id,
            answer: self.answer.clone(),
            revision: self.revision,
        }
    }
}

#[derive(Debug)]
pub struct DraftTracker {
    window: Duration,
    entries: HashMap<DbId, Entry>,
    /// Shared by all entries so a recreated entry never reuses a revision.
    last_revision: u64,
}

impl DraftTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
            last_revision: 0,
        }
    }

    /// Record a new partial answer and (re)start the debounce window.
    ///
    /// While a persist is in flight the window is not started; the
    /// follow-up persist covers the change instead.
    pub fn on_change(&mut self, question_id: DbId, answer: Answer, now: Instant) {
        let window = self.window;
        self.last_revision += 1;
        let revision = self.last_revision;
        let entry = self.entries.entry(question_id).or_insert_with(|| Entry {
            answer: answer.clone(),
            revision: 0,
            dirty: false,
            deadline: None,
            in_flight: None,
            follow_up: false,
            last_saved: None,
            last_error: None,
        });

        entry.answer = answer;
        entry.revision = revision;
        entry.dirty = true;

        if entry.in_flight.is_some() {
            entry.follow_up = true;
            entry.deadline = None;
        } else {
            entry.deadline = Some(now + window);
        }
    }

    /// Start every persist whose window has closed at `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<PersistJob> {
        let mut due: Vec<PersistJob> = self
            .entries
            .iter_mut()
            .filter(|(_, e)| e.in_flight.is_none() && e.deadline.is_some_and(|d| d <= now))
            .map(|(&id, e)| e.start(id))
            .collect();
        due.sort_by_key(|job| job.question_id);
        due
    }

    /// Cancel the pending window and persist immediately.
    pub fn flush(&mut self, question_id: DbId) -> FlushDecision {
        let Some(entry) = self.entries.get_mut(&question_id) else {
            return FlushDecision::Clean;
        };
        if !entry.dirty {
            return FlushDecision::Clean;
        }
        if entry.in_flight.is_some() {
            entry.follow_up = true;
            entry.deadline = None;
            return FlushDecision::Deferred;
        }
        FlushDecision::Start(entry.start(question_id))
    }

    /// Record the result of the persist for `revision`.
    ///
    /// A failure leaves the draft dirty without re-arming the window: the
    /// next change or flush retries it.
    pub fn complete(
        &mut self,
        question_id: DbId,
        revision: u64,
        result: Result<(), String>,
        now: Instant,
    ) -> Completion {
        let stale = Completion {
            saved: false,
            follow_up: None,
        };
        let Some(entry) = self.entries.get_mut(&question_id) else {
            // Discarded while in flight.
            return stale;
        };
        if entry.in_flight != Some(revision) {
            // Belongs to an entry discarded and recreated since.
            return stale;
        }

        entry.in_flight = None;
        let saved = match result {
            Ok(()) => {
                entry.last_error = None;
                entry.last_saved = Some(now);
                if entry.revision == revision {
                    entry.dirty = false;
                }
                entry.revision == revision
            }
            Err(e) => {
                entry.last_error = Some(e);
                false
            }
        };

        let follow_up = if entry.follow_up {
            entry.follow_up = false;
            entry.dirty.then(|| entry.start(question_id))
        } else {
            None
        };

        Completion { saved, follow_up }
    }

    /// Forget a question's draft (after its final submit).
    pub fn discard(&mut self, question_id: DbId) -> bool {
        self.entries.remove(&question_id).is_some()
    }

    /// Earliest open debounce deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| e.in_flight.is_none())
            .filter_map(|e| e.deadline)
            .min()
    }

    pub fn is_dirty(&self, question_id: DbId) -> bool {
        self.entries.get(&question_id).is_some_and(|e| e.dirty)
    }

    pub fn is_in_flight(&self, question_id: DbId) -> bool {
        self.entries
            .get(&question_id)
            .is_some_and(|e| e.in_flight.is_some())
    }

    /// When a persist last succeeded for this question.
    pub fn last_saved(&self, question_id: DbId) -> Option<Instant> {
        self.entries.get(&question_id).and_then(|e| e.last_saved)
    }

    pub fn last_error(&self, question_id: DbId) -> Option<&str> {
        self.entries
            .get(&question_id)
            .and_then(|e| e.last_error.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
