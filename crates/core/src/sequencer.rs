//! Fixed linear walk through an assessment's questions.
//!
//! [`QuestionSequencer`] holds the immutable question list and the
//! responses recorded so far. Every accepted submission advances the
//! index by exactly one; there is no skipping or branching. The guard
//! errors ([`SequenceError::MismatchedQuestion`],
//! [`SequenceError::OutOfSequence`]) catch stale UI state submitting
//! after a navigation race and never move the index.

use serde::Serialize;

use crate::error::CoreError;
use crate::question::{validate_question_set, Answer, Question, QuestionKind, Response};
use crate::types::{DbId, Timestamp};

/// Errors returned by [`QuestionSequencer::submit`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    /// All questions have already been answered.
    #[error("Submission after the last question (question {question_id})")]
    OutOfSequence { question_id: DbId },

    /// The submission addresses a question other than the current one.
    #[error("Submission for question {submitted} but current question is {current}")]
    MismatchedQuestion { submitted: DbId, current: DbId },

    /// The answer's shape does not fit the question kind.
    #[error("Question {question_id} expects a {expected:?} answer, got {got:?}")]
    AnswerKindMismatch {
        question_id: DbId,
        expected: QuestionKind,
        got: QuestionKind,
    },

    /// A selected choice index is outside the question's choice list.
    #[error("Choice {index} is out of range for question {question_id} ({count} choices)")]
    ChoiceOutOfRange {
        question_id: DbId,
        index: usize,
        count: usize,
    },
}

/// A candidate's final answer for one question, before timing is added.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub question_id: DbId,
    pub answer: Answer,
}

/// Outcome of an accepted submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance<'a> {
    /// The next question is now current.
    Next(&'a Question),
    /// The list is exhausted.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct QuestionSequencer {
    questions: Vec<Question>,
    index: usize,
    responses: Vec<Response>,
    /// When the current question was first shown.
    presented_at: Timestamp,
}

impl QuestionSequencer {
    /// Build a sequencer over a validated question list, presenting the
    /// first question at `now`.
    pub fn new(questions: Vec<Question>, now: Timestamp) -> Result<Self, CoreError> {
        validate_question_set(&questions)?;
        Ok(Self {
            responses: Vec::with_capacity(questions.len()),
            questions,
            index: 0,
            presented_at: now,
        })
    }

    /// The question awaiting an answer, or `None` once exhausted.
    pub fn current(&self) -> Option<&Question> {
        self.questions.get(self.index)
    }

    /// Record a response for the current question and advance by one.
    pub fn submit(
        &mut self,
        submission: Submission,
        now: Timestamp,
    ) -> Result<Advance<'_>, SequenceError> {
        let Some(current) = self.questions.get(self.index) else {
            return Err(SequenceError::OutOfSequence {
                question_id: submission.question_id,
            });
        };

        if submission.question_id != current.id {
            return Err(SequenceError::MismatchedQuestion {
                submitted: submission.question_id,
                current: current.id,
            });
        }

        check_answer_shape(current, &submission.answer)?;

        let elapsed_secs = (now - self.presented_at).num_seconds().max(0) as u64;
        self.responses.push(Response {
            question_id: current.id,
            answer: submission.answer,
            submitted_at: now,
            elapsed_secs,
        });
        self.index += 1;
        self.presented_at = now;

        Ok(match self.questions.get(self.index) {
            Some(next) => Advance::Next(next),
            None => Advance::Finished,
        })
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Index of the current question; equals `len()` once finished.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.questions.len()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            answered: self.responses.len(),
            total: self.questions.len(),
        }
    }
}

/// Reject answers whose shape cannot belong to `question`.
fn check_answer_shape(question: &Question, answer: &Answer) -> Result<(), SequenceError> {
    if answer.kind() != question.kind {
        return Err(SequenceError::AnswerKindMismatch {
            question_id: question.id,
            expected: question.kind,
            got: answer.kind(),
        });
    }

    if let Answer::MultipleChoice { selected } = answer {
        let count = question.choice_count();
        if let Some(&index) = selected.iter().find(|&&i| i >= count) {
            return Err(SequenceError::ChoiceOutOfRange {
                question_id: question.id,
                index,
                count,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
