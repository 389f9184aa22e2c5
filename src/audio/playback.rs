//! Gapless playback of inbound audio frames
//!
//! Frames are decoded one at a time and placed back to back on the output
//! clock. Consecutive chunks overlap by the fade length so their faded edges
//! crossfade instead of clicking. The next chunk is scheduled shortly before
//! the current one ends, either by [`PlaybackScheduler::fire_due`] or by the
//! driver task from [`PlaybackScheduler::spawn_driver`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::audio::buffer::{AudioFrame, PlaybackQueue, PlaybackQueueStats};
use crate::audio::output::AudioOutput;
use crate::codec::{apply_edge_fades, decode_playback};
use crate::config::PlaybackConfig;

/// Upper bound on how long the driver sleeps before re-reading the output
/// clock. The device clock and the tokio clock drift apart.
const MAX_DRIVER_WAIT: Duration = Duration::from_millis(20);

/// Result of one drain step
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Queue was empty; playback is idle
    Idle,
    /// A chunk was placed on the output clock
    Scheduled { start: f64, duration: f64 },
    /// The head frame could not be played and was skipped
    Skipped { retry_in: Duration },
    /// Too many failures in a row; the rest of the burst was dropped
    Abandoned { dropped: usize },
}

struct PlaybackState {
    queue: PlaybackQueue,
    is_playing: bool,
    next_drain_at: Option<f64>,
    consecutive_failures: u32,
    chunks_scheduled: u64,
    frames_skipped: u64,
}

/// Playback scheduler statistics
#[derive(Debug, Clone)]
pub struct PlaybackStats {
    pub queue: PlaybackQueueStats,
    pub chunks_scheduled: u64,
    pub frames_skipped: u64,
}

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    config: PlaybackConfig,
    state: Mutex<PlaybackState>,
    wake: Arc<Notify>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, config: PlaybackConfig) -> Self {
        Self {
            output,
            config,
            state: Mutex::new(PlaybackState {
                queue: PlaybackQueue::new(),
                is_playing: false,
                next_drain_at: None,
                consecutive_failures: 0,
                chunks_scheduled: 0,
                frames_skipped: 0,
            }),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Append a frame. An idle scheduler starts playing it right away.
    pub fn enqueue(&self, frame: AudioFrame) {
        {
            let mut state = self.state.lock();
            state.queue.push(frame);
            if !state.is_playing {
                self.drain_locked(&mut state);
            }
        }
        self.wake.notify_one();
    }

    /// Schedule the frame at the head of the queue
    pub fn drain_next(&self) -> DrainOutcome {
        let outcome = self.drain_locked(&mut self.state.lock());
        self.wake.notify_one();
        outcome
    }

    /// Run the armed drain if the output clock has reached it
    pub fn fire_due(&self) -> Option<DrainOutcome> {
        let mut state = self.state.lock();
        let due = state.next_drain_at?;
        if self.output.now() < due {
            return None;
        }
        Some(self.drain_locked(&mut state))
    }

    /// Drop everything pending and silence audio already handed to the
    /// output. No armed drain survives a flush.
    pub fn flush(&self) {
        let dropped = {
            let mut state = self.state.lock();
            let dropped = state.queue.clear();
            state.is_playing = false;
            state.next_drain_at = None;
            state.consecutive_failures = 0;
            dropped
        };
        self.output.stop_all();
        self.wake.notify_one();
        if dropped > 0 {
            tracing::debug!(dropped, "Playback flushed");
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().is_playing
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn next_play_time(&self) -> Option<f64> {
        self.state.lock().queue.next_play_time()
    }

    /// Output clock time of the armed drain, if any
    pub fn pending_drain_at(&self) -> Option<f64> {
        self.state.lock().next_drain_at
    }

    /// Get statistics
    pub fn stats(&self) -> PlaybackStats {
        let state = self.state.lock();
        PlaybackStats {
            queue: state.queue.stats(),
            chunks_scheduled: state.chunks_scheduled,
            frames_skipped: state.frames_skipped,
        }
    }

    /// Spawn the task that fires armed drains on time. The task ends when
    /// the scheduler is dropped.
    pub fn spawn_driver(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::downgrade(self);
        let wake = self.wake.clone();

        tokio::spawn(async move {
            loop {
                let wait = {
                    let Some(scheduler) = scheduler.upgrade() else {
                        break;
                    };
                    scheduler.fire_due();
                    scheduler.time_until_due()
                };
                match wait {
                    Some(wait) => {
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = wake.notified() => {}
                        }
                    }
                    None => wake.notified().await,
                }
            }
            tracing::debug!("Playback driver stopped");
        })
    }

    fn time_until_due(&self) -> Option<Duration> {
        let due = self.state.lock().next_drain_at?;
        let remaining = (due - self.output.now()).max(0.0);
        Some(Duration::from_secs_f64(remaining).min(MAX_DRIVER_WAIT))
    }

    /// Schedule the next queued frame. Consecutive chunks overlap by the
    /// fade length, clipped to half the frame when the frame is shorter
    /// than two fades.
    fn drain_locked(&self, state: &mut PlaybackState) -> DrainOutcome {
        state.next_drain_at = None;

        let Some(frame) = state.queue.pop() else {
            state.is_playing = false;
            state.queue.reset_next_play_time();
            state.consecutive_failures = 0;
            return DrainOutcome::Idle;
        };
        state.is_playing = true;

        let mut samples = match decode_playback(frame.pcm()) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!("Dropping undecodable audio frame: {}", e);
                return self.on_failure(state);
            }
        };

        let rate = self.output.sample_rate() as f64;
        let fade = self.config.fade_samples.min(samples.len() / 2);
        apply_edge_fades(&mut samples, fade);

        let now = self.output.now();
        let start = match state.queue.next_play_time() {
            Some(at) if at > now => at,
            _ => now,
        };
        let duration = samples.len() as f64 / rate;

        if let Err(e) = self.output.schedule(start, samples) {
            tracing::warn!("Failed to schedule audio chunk: {}", e);
            return self.on_failure(state);
        }

        state.consecutive_failures = 0;
        state.chunks_scheduled += 1;
        state
            .queue
            .set_next_play_time(start + duration - fade as f64 / rate);
        let lead = self.config.drain_lead().as_secs_f64();
        state.next_drain_at = Some((start + duration - lead).max(now));

        DrainOutcome::Scheduled { start, duration }
    }

    fn on_failure(&self, state: &mut PlaybackState) -> DrainOutcome {
        state.frames_skipped += 1;
        state.consecutive_failures += 1;
        state.queue.reset_next_play_time();

        if state.consecutive_failures >= self.config.max_consecutive_failures {
            let dropped = state.queue.clear();
            state.is_playing = false;
            state.consecutive_failures = 0;
            tracing::error!(dropped, "Too many playback failures, dropping the rest of the burst");
            return DrainOutcome::Abandoned { dropped };
        }

        let retry_in = self.config.retry_delay(state.consecutive_failures);
        state.next_drain_at = Some(self.output.now() + retry_in.as_secs_f64());
        DrainOutcome::Skipped { retry_in }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        // Let a parked driver observe that the scheduler is gone
        self.wake.notify_one();
    }
}
