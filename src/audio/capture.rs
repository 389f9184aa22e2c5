//! Microphone capture
//!
//! The device delivers samples on its own audio thread at its own cadence.
//! Samples are reassembled into fixed-size blocks and every block passes
//! through the [`CaptureGate`], which consults the session state and the
//! transport each time before anything is transmitted.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::audio::device::{classify_build_error, default_input_device};
use crate::codec::{encode_capture, to_wire_format};
use crate::config::{AudioFraming, CaptureConfig};
use crate::error::CaptureError;
use crate::network::{Outbound, Payload, Transport};
use crate::session::SessionHandle;

/// What the capture side asks of the input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl From<&CaptureConfig> for CaptureConstraints {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: 1,
            block_size: config.block_size,
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

/// Receives raw device samples, on the device's thread
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// An acquired input device. Closing releases it.
pub trait InputHandle: Send {
    fn close(&mut self);
}

/// Source of microphone input
pub trait MicrophoneBackend: Send + Sync {
    /// Acquire the microphone and start delivering samples to `on_samples`
    fn open(
        &self,
        constraints: &CaptureConstraints,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn InputHandle>, CaptureError>;
}

/// Default input device through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

struct CpalInputHandle {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl InputHandle for CpalInputHandle {
    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalInputHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl MicrophoneBackend for CpalMicrophone {
    fn open(
        &self,
        constraints: &CaptureConstraints,
        mut on_samples: SampleCallback,
    ) -> Result<Box<dyn InputHandle>, CaptureError> {
        let device = default_input_device()?;

        // cpal exposes no switches for these; the host's own voice
        // processing applies when the platform provides it.
        tracing::debug!(
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            auto_gain_control = constraints.auto_gain_control,
            "Requested input processing is delegated to the host"
        );

        let config = StreamConfig {
            channels: constraints.channels,
            sample_rate: cpal::SampleRate(constraints.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);

        let handle = thread::Builder::new()
            .name("capture-microphone".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| on_samples(data),
                    |err| {
                        tracing::error!("Capture stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(classify_build_error(&e)));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let err = match e {
                        cpal::PlayStreamError::DeviceNotAvailable => {
                            CaptureError::ResourceUnavailable(e.to_string())
                        }
                        other => CaptureError::StreamError(other.to_string()),
                    };
                    let _ = ready_tx.send(Err(err));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running; the stream drops on exit
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| CaptureError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalInputHandle {
                running,
                thread_handle: Some(handle),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::StreamError(
                    "capture thread exited before the stream started".to_string(),
                ))
            }
        }
    }
}

/// Reassembles variable-size device callbacks into exact blocks
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size * 2),
        }
    }

    /// Append samples and hand every completed block to `on_block`
    pub fn push(&mut self, samples: &[f32], mut on_block: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.block_size * self.block_size;
        if complete == 0 {
            return;
        }
        for block in self.pending[..complete].chunks_exact(self.block_size) {
            on_block(block);
        }
        self.pending.drain(..complete);
    }

    /// Samples waiting for a block to fill
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Why a block was not transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    MicDisabled,
    AiSpeaking,
    NotConnected,
    SendFailed,
}

/// Outcome of a block at the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Sent,
    Discarded(DiscardReason),
}

/// Turn-taking gate in front of the transport
pub struct CaptureGate {
    session: SessionHandle,
    transport: Arc<dyn Transport>,
    framing: AudioFraming,
    blocks_sent: AtomicU64,
    blocks_discarded: AtomicU64,
}

impl CaptureGate {
    pub fn new(session: SessionHandle, transport: Arc<dyn Transport>, framing: AudioFraming) -> Self {
        Self {
            session,
            transport,
            framing,
            blocks_sent: AtomicU64::new(0),
            blocks_discarded: AtomicU64::new(0),
        }
    }

    /// Decide on one block and transmit it when the session allows.
    ///
    /// Discarded blocks are neither sent nor buffered.
    pub fn process_block(&self, block: &[f32]) -> GateDecision {
        let decision = self.admit();
        if decision != GateDecision::Sent {
            self.blocks_discarded.fetch_add(1, Ordering::Relaxed);
            return decision;
        }

        let pcm = encode_capture(block);
        let payload = match self.framing {
            AudioFraming::Base64Text => Payload::Text(to_wire_format(&pcm)),
            AudioFraming::RawBinary => Payload::Binary(pcm),
        };

        match self.transport.send(Outbound::Audio, payload) {
            Ok(()) => {
                self.blocks_sent.fetch_add(1, Ordering::Relaxed);
                GateDecision::Sent
            }
            Err(e) => {
                tracing::warn!("Failed to send audio block: {}", e);
                self.blocks_discarded.fetch_add(1, Ordering::Relaxed);
                GateDecision::Discarded(DiscardReason::SendFailed)
            }
        }
    }

    fn admit(&self) -> GateDecision {
        let state = self.session.snapshot();
        if !state.mic_enabled {
            GateDecision::Discarded(DiscardReason::MicDisabled)
        } else if state.ai_speaking {
            GateDecision::Discarded(DiscardReason::AiSpeaking)
        } else if !self.transport.is_connected() {
            GateDecision::Discarded(DiscardReason::NotConnected)
        } else {
            GateDecision::Sent
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Get statistics
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            blocks_sent: self.blocks_sent.load(Ordering::Relaxed),
            blocks_discarded: self.blocks_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Capture statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub blocks_sent: u64,
    pub blocks_discarded: u64,
}

/// One live microphone acquisition
pub struct CaptureSession {
    id: Uuid,
    handle: Box<dyn InputHandle>,
    routed: Arc<AtomicBool>,
    started_at: Instant,
}

impl CaptureSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn release(mut self) {
        self.routed.store(false, Ordering::SeqCst);
        self.handle.close();
    }
}

/// Owns at most one [`CaptureSession`] and routes its blocks to the gate
pub struct CapturePipeline {
    backend: Arc<dyn MicrophoneBackend>,
    gate: Arc<CaptureGate>,
    constraints: CaptureConstraints,
    active: Option<CaptureSession>,
}

impl CapturePipeline {
    pub fn new(
        backend: Arc<dyn MicrophoneBackend>,
        gate: Arc<CaptureGate>,
        constraints: CaptureConstraints,
    ) -> Self {
        Self {
            backend,
            gate,
            constraints,
            active: None,
        }
    }

    /// Acquire the microphone and begin producing blocks.
    ///
    /// Starting an already running pipeline is a no-op.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Ok(());
        }

        let routed = Arc::new(AtomicBool::new(true));
        let routed_for_callback = routed.clone();
        let gate = self.gate.clone();
        let mut assembler = BlockAssembler::new(self.constraints.block_size);

        let callback: SampleCallback = Box::new(move |data: &[f32]| {
            if !routed_for_callback.load(Ordering::Relaxed) {
                return;
            }
            assembler.push(data, |block| {
                gate.process_block(block);
            });
        });

        let handle = self.backend.open(&self.constraints, callback)?;
        let session = CaptureSession {
            id: Uuid::new_v4(),
            handle,
            routed,
            started_at: Instant::now(),
        };
        tracing::info!(
            capture_id = %session.id,
            sample_rate = self.constraints.sample_rate,
            block_size = self.constraints.block_size,
            "Audio capture started"
        );
        self.active = Some(session);
        Ok(())
    }

    /// Release the microphone. When a capture was live and the transport is
    /// connected, the remote side is told the mic went off. Safe to call at
    /// any time.
    pub fn stop(&mut self) {
        let Some(session) = self.active.take() else {
            return;
        };
        let capture_id = session.id();
        let uptime = session.uptime();
        session.release();

        let transport = self.gate.transport();
        if transport.is_connected() {
            if let Err(e) = transport.send(Outbound::MicOff, Payload::Empty) {
                tracing::warn!("Failed to send mic-off: {}", e);
            }
        }

        let stats = self.gate.stats();
        tracing::info!(
            capture_id = %capture_id,
            uptime_ms = uptime.as_millis() as u64,
            blocks_sent = stats.blocks_sent,
            blocks_discarded = stats.blocks_discarded,
            "Audio capture stopped"
        );
    }

    /// Check if a capture session is live
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn gate(&self) -> &Arc<CaptureGate> {
        &self.gate
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            session.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_wire_format, pcm};
    use crate::network::memory::MemoryConnector;
    use crate::network::{Channel, Connector};
    use crate::session::{Phase, SessionState};
    use crate::testing::ScriptedMicrophone;
    use proptest::prelude::*;

    fn connected_channel() -> (Channel, crate::network::memory::MemoryRemote) {
        let (connector, remote) = MemoryConnector::new();
        let channel = Channel::new();
        futures_util::FutureExt::now_or_never(connector.connect(&channel))
            .expect("memory connect completes immediately")
            .expect("memory connect succeeds");
        (channel, remote)
    }

    fn listening_state() -> SessionState {
        SessionState {
            phase: Phase::Listening,
            mic_enabled: true,
            ai_speaking: false,
            introduction_done: true,
        }
    }

    #[test]
    fn test_block_assembler_emits_exact_blocks() {
        let mut assembler = BlockAssembler::new(4);
        let mut blocks = Vec::new();

        assembler.push(&[1.0, 2.0, 3.0], |b| blocks.push(b.to_vec()));
        assert!(blocks.is_empty());
        assert_eq!(assembler.pending(), 3);

        assembler.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |b| blocks.push(b.to_vec()));
        assert_eq!(
            blocks,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn test_gate_sends_base64_pcm_when_allowed() {
        let (channel, remote) = connected_channel();
        let session = SessionHandle::new(listening_state());
        let gate = CaptureGate::new(session, Arc::new(channel), AudioFraming::Base64Text);

        assert_eq!(gate.process_block(&[0.5, -0.5]), GateDecision::Sent);

        let sent = remote.drain_outbound();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, Outbound::Audio);
        let Payload::Text(text) = &sent[0].payload else {
            panic!("expected text payload");
        };
        let samples = pcm::pcm_bytes_to_samples(&from_wire_format(text).unwrap()).unwrap();
        assert_eq!(samples, vec![16383, -16384]);
    }

    #[test]
    fn test_gate_raw_binary_framing() {
        let (channel, remote) = connected_channel();
        let session = SessionHandle::new(listening_state());
        let gate = CaptureGate::new(session, Arc::new(channel), AudioFraming::RawBinary);

        gate.process_block(&[1.0]);
        let sent = remote.drain_outbound();
        assert_eq!(sent[0].payload, Payload::Binary(bytes::Bytes::from_static(&[0xff, 0x7f])));
    }

    #[test]
    fn test_gate_discards_when_not_allowed() {
        let (channel, remote) = connected_channel();
        let session = SessionHandle::new(listening_state());
        let gate = CaptureGate::new(session.clone(), Arc::new(channel.clone()), AudioFraming::Base64Text);

        session.update(|s| s.mic_enabled = false);
        assert_eq!(
            gate.process_block(&[0.1]),
            GateDecision::Discarded(DiscardReason::MicDisabled)
        );

        session.update(|s| {
            s.mic_enabled = true;
            s.ai_speaking = true;
        });
        assert_eq!(
            gate.process_block(&[0.1]),
            GateDecision::Discarded(DiscardReason::AiSpeaking)
        );

        session.update(|s| s.ai_speaking = false);
        channel.disconnect();
        assert_eq!(
            gate.process_block(&[0.1]),
            GateDecision::Discarded(DiscardReason::NotConnected)
        );

        assert!(remote.drain_outbound().is_empty());
        assert_eq!(gate.stats().blocks_discarded, 3);
    }

    #[test]
    fn test_pipeline_routes_blocks_and_stops() {
        let (channel, remote) = connected_channel();
        let session = SessionHandle::new(listening_state());
        let gate = Arc::new(CaptureGate::new(session, Arc::new(channel), AudioFraming::Base64Text));
        let mic = ScriptedMicrophone::new();
        let constraints = CaptureConstraints {
            block_size: 4,
            ..CaptureConstraints::default()
        };
        let mut pipeline = CapturePipeline::new(Arc::new(mic.clone()), gate, constraints);

        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert_eq!(mic.open_count(), 1);

        mic.feed(&[0.0; 10]);
        assert_eq!(remote.drain_outbound().len(), 2);

        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(mic.is_closed());
        let sent = remote.drain_outbound();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, Outbound::MicOff);

        // Routing is disconnected even if the device keeps calling back
        mic.feed(&[0.0; 8]);
        assert!(remote.drain_outbound().is_empty());

        // Idempotent
        pipeline.stop();
        assert!(remote.drain_outbound().is_empty());
    }

    #[test]
    fn test_pipeline_surfaces_acquisition_errors() {
        let (channel, _remote) = connected_channel();
        let session = SessionHandle::new(listening_state());
        let gate = Arc::new(CaptureGate::new(session, Arc::new(channel), AudioFraming::Base64Text));
        let mic = ScriptedMicrophone::failing(CaptureError::PermissionDenied("refused".into()));
        let mut pipeline = CapturePipeline::new(Arc::new(mic), gate, CaptureConstraints::default());

        assert_eq!(
            pipeline.start(),
            Err(CaptureError::PermissionDenied("refused".into()))
        );
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_stop_when_never_started_sends_nothing() {
        let (channel, remote) = connected_channel();
        let session = SessionHandle::new(listening_state());
        let gate = Arc::new(CaptureGate::new(session, Arc::new(channel), AudioFraming::Base64Text));
        let mut pipeline =
            CapturePipeline::new(Arc::new(ScriptedMicrophone::new()), gate, CaptureConstraints::default());

        pipeline.stop();
        assert!(remote.drain_outbound().is_empty());
    }

    #[derive(Debug, Clone)]
    enum GateStep {
        Mic(bool),
        AiSpeaking(bool),
        Disconnect,
        Block,
    }

    fn gate_step() -> impl Strategy<Value = GateStep> {
        prop_oneof![
            any::<bool>().prop_map(GateStep::Mic),
            any::<bool>().prop_map(GateStep::AiSpeaking),
            Just(GateStep::Disconnect),
            Just(GateStep::Block),
            Just(GateStep::Block),
        ]
    }

    proptest! {
        #[test]
        fn prop_no_transmission_outside_user_turn(steps in proptest::collection::vec(gate_step(), 1..64)) {
            let (channel, remote) = connected_channel();
            let session = SessionHandle::new(SessionState {
                phase: Phase::Listening,
                ..SessionState::default()
            });
            let gate = CaptureGate::new(session.clone(), Arc::new(channel.clone()), AudioFraming::Base64Text);

            for step in steps {
                match step {
                    GateStep::Mic(on) => session.update(|s| s.mic_enabled = on),
                    GateStep::AiSpeaking(on) => session.update(|s| s.ai_speaking = on),
                    GateStep::Disconnect => channel.disconnect(),
                    GateStep::Block => {
                        let state = session.snapshot();
                        let allowed = state.mic_enabled && !state.ai_speaking && channel.is_connected();
                        let before = remote.outbound_len();
                        let decision = gate.process_block(&[0.25; 8]);
                        let after = remote.outbound_len();
                        prop_assert_eq!(decision == GateDecision::Sent, allowed);
                        prop_assert_eq!(after - before, usize::from(allowed));
                    }
                }
            }
        }
    }
}
