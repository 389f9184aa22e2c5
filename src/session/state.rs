//! Session phase and turn-taking flags

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not connected yet, or back after a failed attempt
    #[default]
    Idle,
    Connecting,
    Connected,
    Listening,
    AiSpeaking,
    Grading,
    Disconnected,
}

impl Phase {
    /// Phases in which the user may turn the microphone on
    pub fn allows_mic(&self) -> bool {
        matches!(self, Phase::Connected | Phase::Listening | Phase::AiSpeaking)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "IDLE",
            Phase::Connecting => "CONNECTING",
            Phase::Connected => "CONNECTED",
            Phase::Listening => "LISTENING",
            Phase::AiSpeaking => "AI_SPEAKING",
            Phase::Grading => "GRADING",
            Phase::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    pub mic_enabled: bool,
    pub ai_speaking: bool,
    /// Set once the counterpart's first turn has completed
    pub introduction_done: bool,
}

/// Shared handle to the one [`SessionState`] of a session.
///
/// Readers get copies; only the session module mutates it.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        *self.inner.read()
    }

    pub fn phase(&self) -> Phase {
        self.inner.read().phase
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.inner.read().ai_speaking
    }

    /// Mutate under the write lock
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.inner.write())
    }
}

/// Wall-clock duration of a session
#[derive(Debug, Default)]
pub struct SessionClock {
    inner: Mutex<ClockState>,
}

#[derive(Debug, Default)]
struct ClockState {
    started_at: Option<Instant>,
    frozen: Option<Duration>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from zero
    pub fn start(&self) {
        let mut clock = self.inner.lock();
        clock.started_at = Some(Instant::now());
        clock.frozen = None;
    }

    /// Freeze the elapsed time and return it. Stopping a stopped clock
    /// changes nothing and returns `None`.
    pub fn stop(&self) -> Option<Duration> {
        let mut clock = self.inner.lock();
        let started_at = clock.started_at.take()?;
        let elapsed = started_at.elapsed();
        clock.frozen = Some(elapsed);
        Some(elapsed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().started_at.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        let clock = self.inner.lock();
        match clock.started_at {
            Some(started_at) => started_at.elapsed(),
            None => clock.frozen.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mic_allowed_phases() {
        assert!(Phase::Connected.allows_mic());
        assert!(Phase::Listening.allows_mic());
        assert!(Phase::AiSpeaking.allows_mic());
        assert!(!Phase::Idle.allows_mic());
        assert!(!Phase::Grading.allows_mic());
        assert!(!Phase::Disconnected.allows_mic());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::AiSpeaking.to_string(), "AI_SPEAKING");
    }

    #[test]
    fn test_handle_shares_state() {
        let handle = SessionHandle::default();
        let reader = handle.clone();
        handle.update(|s| {
            s.phase = Phase::Listening;
            s.mic_enabled = true;
        });
        assert_eq!(reader.phase(), Phase::Listening);
        assert!(reader.snapshot().mic_enabled);
    }

    #[test]
    fn test_clock_freezes_on_stop() {
        let clock = SessionClock::new();
        assert_eq!(clock.elapsed(), Duration::ZERO);

        clock.start();
        std::thread::sleep(Duration::from_millis(5));
        let frozen = clock.stop().unwrap();
        assert!(frozen >= Duration::from_millis(5));
        assert_eq!(clock.elapsed(), frozen);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.stop(), None);
        assert_eq!(clock.elapsed(), frozen);
        assert!(!clock.is_running());
    }
}
