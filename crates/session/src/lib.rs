//! Candidate-side session runtime.
//!
//! Drives one timed assessment or live interview: the lifecycle
//! [`controller`], debounced draft [`autosave`], the REST [`backend`],
//! device [`media`] and [`speech`] capabilities, the interview signaling
//! [`relay`], and environment [`config`].

pub mod autosave;
pub mod backend;
pub mod config;
pub mod controller;
pub mod media;
pub mod relay;
pub mod speech;

pub use autosave::{DraftAutoSaver, DraftStore, PersistError};
pub use backend::{BackendError, CompletionReport, HttpBackend, SessionBackend};
pub use config::{ConfigError, SessionConfig};
pub use controller::{
    Collaborators, ControllerError, SessionContext, SessionController, SessionInput, SessionMode,
};
pub use media::{AcquireReport, DeviceKind, MediaAdapter, MediaDevices, MediaError};
pub use relay::{connect_relay, spawn_relay};
pub use speech::{RecognitionResult, SpeechSynthesis, TranscriptBuffer};
