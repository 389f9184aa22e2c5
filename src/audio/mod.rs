//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod output;
pub mod playback;

pub use buffer::{AudioFrame, FrameOrigin, PlaybackQueue};
pub use capture::{CaptureGate, CapturePipeline, CpalMicrophone, MicrophoneBackend};
pub use device::{list_devices, AudioDeviceInfo};
pub use output::{AudioOutput, CpalOutput, Timeline};
pub use playback::{DrainOutcome, PlaybackScheduler};
