//! Questions, answers, responses and drafts.
//!
//! A [`Question`] is immutable once loaded from the backend. The shape of
//! an [`Answer`] depends on the question's [`QuestionKind`]; the
//! sequencer rejects answers whose shape does not fit.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Minimum number of choices for a multiple-choice question.
const MIN_CHOICES: usize = 2;

// ---------------------------------------------------------------------------
// Question
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    Text,
    Coding,
}

/// Input/expected-output pair attached to coding questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    /// Hidden cases are graded but not shown to the candidate.
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Question {
    pub id: DbId,
    /// Ordinal position within the assessment (informational; the list
    /// order is authoritative).
    pub position: u32,
    #[validate(length(min = 1, max = 10000))]
    pub prompt: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub test_cases: Option<Vec<TestCase>>,
    #[serde(default)]
    pub starter_code: Option<String>,
    #[validate(range(max = 1000))]
    pub points: u32,
}

impl Question {
    /// Number of selectable choices (zero for non multiple-choice).
    pub fn choice_count(&self) -> usize {
        self.choices.as_ref().map_or(0, Vec::len)
    }
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// Answer payload; the variant must match the question kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    MultipleChoice {
        /// Zero-based indices into [`Question::choices`].
        selected: Vec<usize>,
    },
    Text {
        text: String,
    },
    Coding {
        #[serde(default)]
        language: Option<String>,
        source: String,
    },
}

impl Answer {
    pub fn kind(&self) -> QuestionKind {
        match self {
            Answer::MultipleChoice { .. } => QuestionKind::MultipleChoice,
            Answer::Text { .. } => QuestionKind::Text,
            Answer::Coding { .. } => QuestionKind::Coding,
        }
    }
}

/// A final answer to one question, created on submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub question_id: DbId,
    pub answer: Answer,
    pub submitted_at: Timestamp,
    /// Seconds spent on this question, from presentation to submit.
    pub elapsed_secs: u64,
}

/// In-progress answer owned by the auto-saver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub question_id: DbId,
    pub answer: Answer,
    pub saved_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a single question, including kind-specific rules.
///
/// Rules:
/// - Prompt must not be empty.
/// - Multiple-choice questions need at least `MIN_CHOICES` choices, none
///   of them empty.
pub fn validate_question(question: &Question) -> Result<(), CoreError> {
    question.validate()?;

    if question.kind == QuestionKind::MultipleChoice {
        let choices = question.choices.as_deref().unwrap_or_default();
        if choices.len() < MIN_CHOICES {
            return Err(CoreError::Validation(format!(
                "Question {} needs at least {MIN_CHOICES} choices",
                question.id
            )));
        }
        if let Some(i) = choices.iter().position(|c| c.trim().is_empty()) {
            return Err(CoreError::Validation(format!(
                "Question {} has an empty choice at index {i}",
                question.id
            )));
        }
    }
    Ok(())
}

/// Validate the ordered list a sequencer is built from.
///
/// Rules:
/// - At least one question.
/// - Every question passes [`validate_question`].
/// - No duplicate ids.
pub fn validate_question_set(questions: &[Question]) -> Result<(), CoreError> {
    if questions.is_empty() {
        return Err(CoreError::Validation(
            "An assessment must contain at least one question".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::with_capacity(questions.len());
    for question in questions {
        validate_question(question)?;
        if !seen.insert(question.id) {
            return Err(CoreError::Validation(format!(
                "Duplicate question id: {}",
                question.id
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
