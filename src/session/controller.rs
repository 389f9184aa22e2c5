//! Session controller
//!
//! Owns the session state, the capture pipeline, the playback scheduler and
//! the channel. Every inbound control message is turned into a state
//! transition here; capture and playback only ever see the result.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::audio::buffer::{AudioFrame, FrameOrigin};
use crate::audio::capture::{CaptureConstraints, CaptureGate, CapturePipeline, MicrophoneBackend};
use crate::audio::output::AudioOutput;
use crate::audio::playback::PlaybackScheduler;
use crate::codec::from_wire_format;
use crate::config::AppConfig;
use crate::error::{SessionError, TransportError};
use crate::network::{Channel, Connector, Destination, Outbound, Payload, Transport};
use crate::protocol::{
    AudioMessage, ErrorMessage, Report, Speaker, StartSession, StatusKind, StatusMessage,
    TextMessage, TranscriptMessage,
};
use crate::session::observer::{SessionEvent, SessionObserver};
use crate::session::state::{Phase, SessionClock, SessionHandle, SessionState};

/// One line of the live transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

pub struct SessionController {
    params: StartSession,
    session: SessionHandle,
    channel: Channel,
    capture: Mutex<CapturePipeline>,
    playback: Arc<PlaybackScheduler>,
    playback_rate: u32,
    driver: Mutex<Option<JoinHandle<()>>>,
    clock: SessionClock,
    transcript: RwLock<Vec<TranscriptEntry>>,
    report: RwLock<Option<Report>>,
    observer: Arc<dyn SessionObserver>,
}

impl SessionController {
    /// Build a controller for one session. Parameters are validated here,
    /// before anything connects.
    pub fn new(
        params: StartSession,
        config: &AppConfig,
        microphone: Arc<dyn MicrophoneBackend>,
        output: Arc<dyn AudioOutput>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<Self>, SessionError> {
        let params = params.validated()?;
        let session = SessionHandle::default();
        let channel = Channel::new();

        let gate = Arc::new(CaptureGate::new(
            session.clone(),
            Arc::new(channel.clone()),
            config.capture.framing,
        ));
        let capture = CapturePipeline::new(
            microphone,
            gate,
            CaptureConstraints::from(&config.capture),
        );
        let playback_rate = output.sample_rate();
        let playback = Arc::new(PlaybackScheduler::new(output, config.playback.clone()));

        let controller = Arc::new(Self {
            params,
            session,
            channel,
            capture: Mutex::new(capture),
            playback,
            playback_rate,
            driver: Mutex::new(None),
            clock: SessionClock::new(),
            transcript: RwLock::new(Vec::new()),
            report: RwLock::new(None),
            observer,
        });

        controller.route(Destination::Status, Self::on_status);
        controller.route(Destination::Audio, Self::on_audio);
        controller.route(Destination::Transcript, Self::on_transcript);
        controller.route(Destination::Report, Self::on_report);
        controller.route(Destination::Error, Self::on_error);
        controller.route(Destination::Text, Self::on_text);

        let weak = Arc::downgrade(&controller);
        controller.channel.on_link_lost(move || {
            if let Some(controller) = weak.upgrade() {
                controller.on_link_lost();
            }
        });

        Ok(controller)
    }

    fn route(self: &Arc<Self>, destination: Destination, handler: fn(&Self, &str)) {
        let controller = Arc::downgrade(self);
        self.channel.subscribe(destination, move |body| {
            if let Some(controller) = controller.upgrade() {
                handler(&controller, body);
            }
        });
    }

    /// Establish the channel and send the start message. A failed attempt,
    /// including a start message the link refuses, puts the session back to
    /// idle with the channel dropped; it is not retried.
    pub async fn connect(&self, connector: &dyn Connector) -> Result<(), SessionError> {
        let allowed = self.apply(|s| {
            if !matches!(s.phase, Phase::Idle | Phase::Disconnected) {
                return Err(s.phase);
            }
            *s = SessionState {
                phase: Phase::Connecting,
                ..SessionState::default()
            };
            Ok(())
        });
        if let Err(phase) = allowed {
            return Err(SessionError::NotAllowed {
                phase,
                reason: "a session is already in progress",
            });
        }
        self.transcript.write().clear();
        *self.report.write() = None;

        if let Err(e) = connector.connect(&self.channel).await {
            tracing::error!("Connection failed: {}", e);
            self.apply(|s| s.phase = Phase::Idle);
            return Err(e.into());
        }

        self.ensure_driver();
        self.apply(|s| s.phase = Phase::Connected);
        self.clock.start();

        if let Err(e) = self.send_start() {
            tracing::error!("Failed to start session: {}", e);
            self.clock.stop();
            self.channel.disconnect();
            self.apply(|s| s.phase = Phase::Idle);
            return Err(e.into());
        }
        tracing::info!(
            candidate = %self.params.candidate_name,
            position = %self.params.position,
            "Session started"
        );
        Ok(())
    }

    fn send_start(&self) -> Result<(), TransportError> {
        let body = serde_json::to_string(&self.params)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.channel.send(Outbound::Start, Payload::Text(body))
    }

    fn ensure_driver(&self) {
        let mut driver = self.driver.lock();
        let alive = driver.as_ref().is_some_and(|handle| !handle.is_finished());
        if !alive {
            *driver = Some(self.playback.spawn_driver());
        }
    }

    // ---- inbound ----

    fn on_status(&self, body: &str) {
        let Some(status) = parse::<StatusMessage>(Destination::Status, body) else {
            return;
        };
        tracing::debug!(kind = ?status.kind, message = ?status.message, "Status received");

        match status.kind {
            StatusKind::Connected => {
                if self.session.phase() == Phase::Connected {
                    tracing::info!("Connected, waiting for the interviewer");
                    self.emit(SessionEvent::WaitingForCounterpart);
                }
            }
            StatusKind::TurnComplete => {
                let first_turn = self.apply(|s| {
                    if !s.ai_speaking {
                        return None;
                    }
                    s.ai_speaking = false;
                    if s.phase == Phase::AiSpeaking {
                        s.phase = Phase::Listening;
                    }
                    let first = !s.introduction_done;
                    s.introduction_done = true;
                    Some(first)
                });
                match first_turn {
                    Some(true) => {
                        if let Err(e) = self.set_mic_enabled(true) {
                            tracing::warn!("Could not enable the microphone: {}", e);
                        }
                    }
                    Some(false) => {}
                    None => tracing::debug!("Turn complete while nobody was speaking"),
                }
            }
            StatusKind::Interrupted => {
                self.playback.flush();
                self.apply(|s| {
                    s.ai_speaking = false;
                    if s.phase == Phase::AiSpeaking {
                        s.phase = Phase::Listening;
                    }
                });
            }
            StatusKind::Grading => {
                self.apply(|s| {
                    s.mic_enabled = false;
                    s.phase = Phase::Grading;
                });
                self.capture.lock().stop();
                self.stop_clock();
            }
            StatusKind::Disconnected => self.mark_disconnected(),
        }
    }

    /// The link closed without a DISCONNECTED status
    fn on_link_lost(&self) {
        let phase = self.session.phase();
        if matches!(phase, Phase::Idle | Phase::Disconnected) {
            return;
        }
        tracing::warn!(%phase, "Link lost during session");
        self.emit(SessionEvent::LinkLost);
        self.mark_disconnected();
    }

    fn mark_disconnected(&self) {
        self.apply(|s| {
            s.mic_enabled = false;
            s.phase = Phase::Disconnected;
        });
        self.capture.lock().stop();
        self.stop_clock();
    }

    fn on_audio(&self, body: &str) {
        let Some(message) = parse::<AudioMessage>(Destination::Audio, body) else {
            return;
        };
        let pcm = match from_wire_format(&message.data) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!("Dropping audio frame: {}", e);
                return;
            }
        };
        let frame = AudioFrame::from_pcm_bytes(Bytes::from(pcm), self.playback_rate, FrameOrigin::RemoteSynthesis);
        self.enqueue_playback(frame);
    }

    fn on_transcript(&self, body: &str) {
        let Some(message) = parse::<TranscriptMessage>(Destination::Transcript, body) else {
            return;
        };
        self.transcript.write().push(TranscriptEntry {
            speaker: message.speaker,
            text: message.text.clone(),
            received_at: Utc::now(),
        });
        self.emit(SessionEvent::Transcript {
            speaker: message.speaker,
            text: message.text,
        });
    }

    fn on_report(&self, body: &str) {
        let Some(report) = parse::<Report>(Destination::Report, body) else {
            return;
        };
        tracing::info!(
            session_id = ?report.session_id,
            overall_score = ?report.overall_score,
            "Report received"
        );
        *self.report.write() = Some(report.clone());
        self.emit(SessionEvent::Report(report));
    }

    fn on_error(&self, body: &str) {
        let Some(error) = parse::<ErrorMessage>(Destination::Error, body) else {
            return;
        };
        let credential = error.credential_fault();
        tracing::error!(message = %error.message, ?credential, "Remote error");

        if credential.is_some() {
            self.teardown(Phase::Idle);
        }
        self.emit(SessionEvent::RemoteError {
            message: error.message,
            credential,
        });
    }

    fn on_text(&self, body: &str) {
        if let Some(message) = parse::<TextMessage>(Destination::Text, body) {
            self.emit(SessionEvent::Text(message.text));
        }
    }

    // ---- collaborator API ----

    /// Acquire the microphone. Blocks still pass the turn-taking gate.
    pub fn start_capture(&self) -> Result<(), SessionError> {
        self.capture.lock().start()?;
        Ok(())
    }

    /// Release the microphone
    pub fn stop_capture(&self) {
        self.capture.lock().stop();
    }

    /// Turn the user's microphone on or off.
    ///
    /// Enabling requires a live conversation phase and a silent counterpart.
    pub fn set_mic_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        if !enabled {
            self.apply(|s| s.mic_enabled = false);
            self.stop_capture();
            return Ok(());
        }

        let allowed = self.apply(|s| {
            if !s.phase.allows_mic() {
                return Err((s.phase, "microphone is not available in this phase"));
            }
            if s.ai_speaking {
                return Err((s.phase, "the interviewer is speaking"));
            }
            s.mic_enabled = true;
            Ok(())
        });
        if let Err((phase, reason)) = allowed {
            return Err(SessionError::NotAllowed { phase, reason });
        }

        if let Err(e) = self.start_capture() {
            self.apply(|s| s.mic_enabled = false);
            return Err(e);
        }
        Ok(())
    }

    /// Hand a frame to playback. Marks the counterpart as speaking.
    pub fn enqueue_playback(&self, frame: AudioFrame) {
        self.apply(|s| {
            s.ai_speaking = true;
            if matches!(s.phase, Phase::Connected | Phase::Listening) {
                s.phase = Phase::AiSpeaking;
            }
        });
        self.playback.enqueue(frame);
    }

    pub fn flush_playback(&self) {
        self.playback.flush();
    }

    /// End the session from this side. The remote answers with grading.
    pub fn end_session(&self) -> Result<(), SessionError> {
        let phase = self.session.phase();
        if matches!(phase, Phase::Idle | Phase::Disconnected) {
            return Err(SessionError::NotAllowed {
                phase,
                reason: "no session to end",
            });
        }

        if self.channel.is_connected() {
            if let Err(e) = self.channel.send(Outbound::End, Payload::Empty) {
                tracing::warn!("Failed to send end: {}", e);
            }
        }
        self.apply(|s| s.mic_enabled = false);
        self.stop_capture();
        self.playback.flush();
        tracing::info!("Session ended locally");
        Ok(())
    }

    /// Release every resource and drop the channel
    pub fn shutdown(&self) {
        self.teardown(Phase::Disconnected);
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }

    fn teardown(&self, phase: Phase) {
        self.capture.lock().stop();
        self.playback.flush();
        self.apply(|s| {
            s.phase = phase;
            s.mic_enabled = false;
            s.ai_speaking = false;
        });
        self.stop_clock();
        self.channel.disconnect();
    }

    pub fn current_phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn is_ai_speaking_now(&self) -> bool {
        self.session.is_ai_speaking()
    }

    pub fn state(&self) -> SessionState {
        self.session.snapshot()
    }

    /// Read-only handle to the live state
    pub fn handle(&self) -> SessionHandle {
        self.session.clone()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().clone()
    }

    pub fn report(&self) -> Option<Report> {
        self.report.read().clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_running()
    }

    pub fn playback(&self) -> &Arc<PlaybackScheduler> {
        &self.playback
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn params(&self) -> &StartSession {
        &self.params
    }

    // ---- internals ----

    /// Mutate the state and tell the observer what changed
    fn apply<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let (before, after, result) = self.session.update(|s| {
            let before = *s;
            let result = f(s);
            (before, *s, result)
        });

        if before.phase != after.phase {
            tracing::info!(from = %before.phase, to = %after.phase, "Session phase changed");
            self.emit(SessionEvent::PhaseChanged {
                from: before.phase,
                to: after.phase,
            });
        }
        if before.mic_enabled != after.mic_enabled {
            self.emit(SessionEvent::MicChanged {
                enabled: after.mic_enabled,
            });
        }
        if before.ai_speaking != after.ai_speaking {
            self.emit(SessionEvent::AiSpeakingChanged {
                speaking: after.ai_speaking,
            });
        }
        result
    }

    fn stop_clock(&self) {
        if let Some(elapsed) = self.clock.stop() {
            tracing::info!(elapsed_secs = elapsed.as_secs(), "Session timer stopped");
            self.emit(SessionEvent::Ended { elapsed });
        }
    }

    fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
    }
}

/// Parse an inbound body; malformed messages are logged and ignored
fn parse<T: DeserializeOwned>(destination: Destination, body: &str) -> Option<T> {
    match serde_json::from_str(body) {
        Ok(message) => Some(message),
        Err(e) => {
            let error = TransportError::Protocol(e.to_string());
            tracing::warn!(destination = destination.path(), "{}", error);
            None
        }
    }
}
