//! Audio output clock and scheduled-start playback
//!
//! The playback scheduler never touches a device directly. It talks to an
//! [`AudioOutput`], which exposes a continuous clock and accepts buffers to
//! start at a given clock time. The cpal implementation renders a
//! [`Timeline`] of scheduled voices from its output callback; the clock is the
//! number of frames rendered so far.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::default_output_device;
use crate::error::OutputError;

/// An output device with a clock that supports scheduled starts
pub trait AudioOutput: Send + Sync {
    /// Current output clock time in seconds
    fn now(&self) -> f64;

    /// Start playing `samples` (mono float) at output clock time `start`
    fn schedule(&self, start: f64, samples: Vec<f32>) -> Result<(), OutputError>;

    /// Stop everything scheduled but not yet played
    fn stop_all(&self);

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;
}

struct Voice {
    start: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Sample-accurate mix of scheduled mono buffers.
///
/// Voices that overlap in time are summed, which is what turns the faded
/// edges of consecutive chunks into a crossfade.
pub struct Timeline {
    sample_rate: u32,
    position: u64,
    voices: Vec<Voice>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            voices: Vec::new(),
        }
    }

    /// Clock time in seconds
    pub fn now(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Frames rendered so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Place a buffer on the timeline. Start times in the past are moved to
    /// the current position.
    pub fn schedule(&mut self, start: f64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let start_frame = (start.max(0.0) * self.sample_rate as f64).round() as u64;
        self.voices.push(Voice {
            start: start_frame.max(self.position),
            samples,
        });
    }

    /// Drop all voices
    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Render into an interleaved buffer with `channels` channels; the mono
    /// mix is copied to every channel.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let t = self.position + i as u64;
            let mut mixed = 0.0f32;
            for voice in &self.voices {
                if t >= voice.start && t < voice.end() {
                    mixed += voice.samples[(t - voice.start) as usize];
                }
            }
            let mixed = mixed.clamp(-1.0, 1.0);
            frame.iter_mut().for_each(|s| *s = mixed);
        }

        self.position += frames as u64;
        let position = self.position;
        self.voices.retain(|voice| voice.end() > position);
    }
}

/// cpal-backed output device
pub struct CpalOutput {
    timeline: Arc<Mutex<Timeline>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl CpalOutput {
    /// Open the default output device at `sample_rate`.
    ///
    /// The stream is owned by a dedicated thread for its whole life; this
    /// call returns once the stream is playing or has failed to open.
    pub fn open(sample_rate: u32) -> Result<Self, OutputError> {
        let device = default_output_device()?;
        let default_config = device
            .default_output_config()
            .map_err(|e| OutputError::DeviceNotFound(e.to_string()))?;

        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let channels = config.channels as usize;

        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), OutputError>>(1);

        let timeline_for_stream = timeline.clone();
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        timeline_for_stream.lock().render(data, channels);
                    },
                    |err| {
                        tracing::error!("Output stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(OutputError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(OutputError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| OutputError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(OutputError::StreamError(
                    "output thread exited before the stream started".to_string(),
                ));
            }
        }

        tracing::info!(sample_rate, channels, "Audio output opened");

        Ok(Self {
            timeline,
            running,
            thread_handle: Some(handle),
            sample_rate,
        })
    }

    /// Stop the stream and release the device
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.timeline.lock().now()
    }

    fn schedule(&self, start: f64, samples: Vec<f32>) -> Result<(), OutputError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(OutputError::Closed);
        }
        self.timeline.lock().schedule(start, samples);
        Ok(())
    }

    fn stop_all(&self) {
        self.timeline.lock().clear();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
