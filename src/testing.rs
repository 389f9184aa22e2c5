//! Device-free doubles for tests

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::capture::{CaptureConstraints, InputHandle, MicrophoneBackend, SampleCallback};
use crate::audio::output::AudioOutput;
use crate::error::{CaptureError, OutputError};
use crate::session::observer::{SessionEvent, SessionObserver};
use crate::session::Phase;

#[derive(Default)]
struct MicState {
    callback: Option<SampleCallback>,
    open_count: usize,
    closed: bool,
}

/// Microphone whose samples are fed by the test
#[derive(Clone, Default)]
pub struct ScriptedMicrophone {
    state: Arc<Mutex<MicState>>,
    fail_with: Option<CaptureError>,
}

impl ScriptedMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// A microphone that can never be opened
    pub fn failing(error: CaptureError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    /// Deliver samples as the device thread would
    pub fn feed(&self, samples: &[f32]) {
        let mut state = self.state.lock();
        if let Some(callback) = state.callback.as_mut() {
            callback(samples);
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

struct ScriptedHandle {
    state: Arc<Mutex<MicState>>,
}

impl InputHandle for ScriptedHandle {
    fn close(&mut self) {
        // The callback stays installed: a real device may still fire once
        // after release, and routing has to cope with that.
        self.state.lock().closed = true;
    }
}

impl MicrophoneBackend for ScriptedMicrophone {
    fn open(
        &self,
        _constraints: &CaptureConstraints,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn InputHandle>, CaptureError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        let mut state = self.state.lock();
        state.callback = Some(on_samples);
        state.open_count += 1;
        state.closed = false;
        Ok(Box::new(ScriptedHandle {
            state: self.state.clone(),
        }))
    }
}

#[derive(Default)]
struct OutputState {
    now: f64,
    scheduled: Vec<(f64, Vec<f32>)>,
    fail_next: usize,
}

/// Output whose clock only moves when the test moves it
pub struct ManualOutput {
    sample_rate: u32,
    state: Mutex<OutputState>,
    stops: AtomicUsize,
}

impl ManualOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Mutex::new(OutputState::default()),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn set_now(&self, now: f64) {
        self.state.lock().now = now;
    }

    /// Start time and length of every scheduled chunk
    pub fn scheduled(&self) -> Vec<(f64, usize)> {
        self.state
            .lock()
            .scheduled
            .iter()
            .map(|(start, samples)| (*start, samples.len()))
            .collect()
    }

    pub fn scheduled_samples(&self, index: usize) -> Vec<f32> {
        self.state.lock().scheduled[index].1.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Make the next `n` schedule calls fail
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }
}

impl AudioOutput for ManualOutput {
    fn now(&self) -> f64 {
        self.state.lock().now
    }

    fn schedule(&self, start: f64, samples: Vec<f32>) -> Result<(), OutputError> {
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(OutputError::StreamError("scripted failure".to_string()));
        }
        state.scheduled.push((start, samples));
        Ok(())
    }

    fn stop_all(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Observer that remembers everything
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn phases(&self) -> Vec<(Phase, Phase)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::PhaseChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().push(event.clone());
    }
}
