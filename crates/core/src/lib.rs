//! Domain types and pure state machines for timed interview and
//! assessment sessions.
//!
//! Nothing in this crate performs I/O. The async collaborators (draft
//! persistence, signaling, media devices) live in `recruit-signaling`
//! and `recruit-session` and drive the types defined here.

pub mod connection;
pub mod error;
pub mod question;
pub mod sequencer;
pub mod session;
pub mod timer;
pub mod types;
