//! Spoken prompts and transcribed answers for the AI interviewer.

use async_trait::async_trait;

/// Default minimum confidence for a final recognition result.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, thiserror::Error)]
#[error("Speech synthesis failed: {0}")]
pub struct SpeechError(pub String);

/// Text-to-speech. Failures are logged and never abort the session.
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;

    /// Stop any utterance in progress.
    async fn cancel(&self);
}

/// One result from the speech recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub text: String,
    pub is_final: bool,
    pub confidence: f64,
}

/// Accumulates recognition results into the text of a spoken answer.
///
/// Final results are appended; an interim result replaces the previous
/// interim one. Finals below the confidence threshold are dropped.
#[derive(Debug, Clone)]
pub struct TranscriptBuffer {
    finals: Vec<String>,
    interim: Option<String>,
    confidence_threshold: f64,
}

impl TranscriptBuffer {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            finals: Vec::new(),
            interim: None,
            confidence_threshold,
        }
    }

    /// Fold in a result. Returns `true` when the visible text changed.
    pub fn add_result(&mut self, result: RecognitionResult) -> bool {
        let text = result.text.trim();

        if !result.is_final {
            let interim = (!text.is_empty()).then(|| text.to_string());
            let changed = interim != self.interim;
            self.interim = interim;
            return changed;
        }

        let had_interim = self.interim.take().is_some();
        if text.is_empty() || result.confidence < self.confidence_threshold {
            tracing::debug!(confidence = result.confidence, "Dropping low-confidence transcript");
            return had_interim;
        }
        self.finals.push(text.to_string());
        true
    }

    /// Finals followed by the current interim, space separated.
    pub fn text(&self) -> String {
        self.finals
            .iter()
            .map(String::as_str)
            .chain(self.interim.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.finals.is_empty() && self.interim.is_none()
    }

    pub fn clear(&mut self) {
        self.finals.clear();
        self.interim = None;
    }
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str, is_final: bool, confidence: f64) -> RecognitionResult {
        RecognitionResult {
            text: text.into(),
            is_final,
            confidence,
        }
    }

    #[test]
    fn interim_replaces_interim() {
        let mut buffer = TranscriptBuffer::default();
        assert!(buffer.add_result(result("I would", false, 0.4)));
        assert!(buffer.add_result(result("I would use a", false, 0.5)));
        assert_eq!(buffer.text(), "I would use a");
    }

    #[test]
    fn finals_accumulate_and_clear_interim() {
        let mut buffer = TranscriptBuffer::default();
        buffer.add_result(result("I would use", false, 0.5));
        buffer.add_result(result("I would use a hash map.", true, 0.92));
        buffer.add_result(result("Lookups are", false, 0.5));
        assert_eq!(buffer.text(), "I would use a hash map. Lookups are");

        buffer.add_result(result("Lookups are constant time.", true, 0.88));
        assert_eq!(buffer.text(), "I would use a hash map. Lookups are constant time.");
    }

    #[test]
    fn low_confidence_final_dropped() {
        let mut buffer = TranscriptBuffer::default();
        buffer.add_result(result("mumble", false, 0.2));
        assert!(buffer.add_result(result("mumble", true, 0.3)));
        assert!(buffer.is_empty());
        assert!(!buffer.add_result(result("noise", true, 0.1)));
    }

    #[test]
    fn clear_resets() {
        let mut buffer = TranscriptBuffer::default();
        buffer.add_result(result("answer", true, 0.9));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.text(), "");
    }
}
