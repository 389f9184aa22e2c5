//! Session events for collaborators

use std::time::Duration;

use crate::protocol::{CredentialFault, Report, Speaker};
use crate::session::Phase;

/// Something a collaborator may want to show or react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged { from: Phase, to: Phase },
    /// Connected; the counterpart has not spoken yet
    WaitingForCounterpart,
    MicChanged { enabled: bool },
    AiSpeakingChanged { speaking: bool },
    Transcript { speaker: Speaker, text: String },
    Text(String),
    Report(Report),
    /// Error reported by the remote service
    RemoteError {
        message: String,
        credential: Option<CredentialFault>,
    },
    /// The link closed without the remote ending the session
    LinkLost,
    /// The session timer stopped
    Ended { elapsed: Duration },
}

/// Receives session events. Called from whichever thread produced the
/// event, never while session locks are held.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Logs every event at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        tracing::debug!(?event, "Session event");
    }
}
