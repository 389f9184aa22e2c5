//! # Duplex Voice
//!
//! Real-time duplex audio core for a spoken, turn-taking conversation between
//! a user and a remote synthesized voice.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               LOCAL SIDE                                 │
//! │                                                                          │
//! │  ┌────────────┐    ┌──────────────────────────────────────────────────┐  │
//! │  │ Microphone │───▶│          Capture Pipeline (audio::capture)       │  │
//! │  │  16 kHz    │    │  4096-sample blocks ─▶ CaptureGate ─▶ PCM16/b64   │  │
//! │  └────────────┘    └────────────────────────┬─────────────────────────┘  │
//! │                             reads ▲          │ audio frames               │
//! │  ┌──────────────────────────────────────┐   │                            │
//! │  │   Session State Machine (session)    │   │                            │
//! │  │   phase · micEnabled · aiSpeaking    │   │                            │
//! │  └──────────────▲───────────────────────┘   │                            │
//! │                 │ status / error / ...      ▼                            │
//! │  ┌──────────────┴───────────────────────────────────────────────────┐   │
//! │  │              Transport Channel (network) - named destinations     │   │
//! │  │   out: start · audio · end · mic-off    in: status · audio · ...  │   │
//! │  └──────────────┬───────────────────────────────────────────────────┘   │
//! │                 │ inbound audio                                          │
//! │                 ▼                                                        │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │         Playback Scheduler (audio::playback) - gapless queue      │   │
//! │  │   decode ─▶ 64-sample fades ─▶ schedule at max(nextPlayTime, now) │   │
//! │  └──────────────┬───────────────────────────────────────────────────┘   │
//! │                 ▼                                                        │
//! │  ┌──────────────────────┐                                                │
//! │  │ Output clock 24 kHz  │                                                │
//! │  └──────────────────────┘                                                │
//! └──────────────────────────────────┬───────────────────────────────────────┘
//!                                    │ WebSocket
//!                                    ▼
//!                         remote synthesis service
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Microphone sample rate
    pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

    /// Samples per transmitted capture block
    pub const CAPTURE_BLOCK_SIZE: usize = 4096;

    /// Sample rate of synthesized audio
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

    /// Linear fade at each edge of a playback chunk
    pub const FADE_SAMPLES: usize = 64;
}
