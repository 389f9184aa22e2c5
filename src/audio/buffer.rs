//! Audio frames and the playback queue
//!
//! Frames carry PCM16 little-endian bytes exactly as they travel over the
//! transport. Decoding happens when the scheduler consumes a frame, so a
//! malformed frame fails at that point and only that frame is lost.

use bytes::Bytes;
use std::collections::VecDeque;

use crate::codec::pcm::{pcm_bytes_to_samples, samples_to_pcm_bytes};
use crate::error::CodecError;

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Microphone capture on this side
    LocalCapture,
    /// Synthesized voice from the remote service
    RemoteSynthesis,
}

/// Immutable mono PCM16 frame
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pcm: Bytes,
    sample_rate: u32,
    origin: FrameOrigin,
}

impl AudioFrame {
    /// Wrap raw PCM16 little-endian bytes
    pub fn from_pcm_bytes(pcm: Bytes, sample_rate: u32, origin: FrameOrigin) -> Self {
        Self {
            pcm,
            sample_rate,
            origin,
        }
    }

    pub fn from_samples(samples: &[i16], sample_rate: u32, origin: FrameOrigin) -> Self {
        Self::from_pcm_bytes(samples_to_pcm_bytes(samples), sample_rate, origin)
    }

    /// Raw PCM16 bytes
    pub fn pcm(&self) -> &Bytes {
        &self.pcm
    }

    /// Decoded samples
    pub fn samples(&self) -> Result<Vec<i16>, CodecError> {
        pcm_bytes_to_samples(&self.pcm)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn origin(&self) -> FrameOrigin {
        self.origin
    }

    /// Number of whole samples in the frame
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Frame duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count() as f64 / self.sample_rate as f64
    }
}

/// FIFO of frames awaiting playback plus the scheduling cursor.
///
/// `next_play_time` is the output-clock time at which the next frame should
/// start, or `None` when no burst is in progress.
#[derive(Default)]
pub struct PlaybackQueue {
    frames: VecDeque<AudioFrame>,
    next_play_time: Option<f64>,
    enqueued: u64,
    flushed: u64,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame at the tail
    pub fn push(&mut self, frame: AudioFrame) {
        self.enqueued += 1;
        self.frames.push_back(frame);
    }

    /// Remove the frame at the head
    pub fn pop(&mut self) -> Option<AudioFrame> {
        self.frames.pop_front()
    }

    /// Drop every pending frame and reset the cursor. Returns how many
    /// frames were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        self.next_play_time = None;
        self.flushed += dropped as u64;
        dropped
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn next_play_time(&self) -> Option<f64> {
        self.next_play_time
    }

    pub fn set_next_play_time(&mut self, at: f64) {
        self.next_play_time = Some(at);
    }

    pub fn reset_next_play_time(&mut self) {
        self.next_play_time = None;
    }

    /// Get statistics
    pub fn stats(&self) -> PlaybackQueueStats {
        PlaybackQueueStats {
            pending: self.frames.len(),
            enqueued: self.enqueued,
            flushed: self.flushed,
        }
    }
}

/// Playback queue statistics
#[derive(Debug, Clone)]
pub struct PlaybackQueueStats {
    pub pending: usize,
    pub enqueued: u64,
    pub flushed: u64,
}
