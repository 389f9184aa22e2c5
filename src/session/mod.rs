//! Session state machine
//!
//! Lifecycle and turn-taking. The [`SessionController`] is the only writer
//! of [`SessionState`]; capture and collaborators read it through a
//! [`SessionHandle`].

pub mod controller;
pub mod observer;
pub mod state;

pub use controller::{SessionController, TranscriptEntry};
pub use observer::{NoopObserver, SessionEvent, SessionObserver, TracingObserver};
pub use state::{Phase, SessionClock, SessionHandle, SessionState};
