//! Error types for the voice session core

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Audio output error: {0}")]
    Output(#[from] OutputError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Microphone acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Access to the input device was refused by the host
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input device exists
    #[error("Microphone unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Unsupported capture format: {0}")]
    UnsupportedFormat(String),

    #[error("Capture stream error: {0}")]
    StreamError(String),
}

/// Audio output errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("Output device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open output stream: {0}")]
    StreamError(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Output is closed")]
    Closed,
}

/// Frame codec errors. Every variant is a decode failure of an inbound frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("PCM16 payload has odd length: {0} bytes")]
    OddByteLength(usize),

    #[error("Invalid wire encoding: {0}")]
    InvalidWireEncoding(String),
}

/// Transport channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel could not be established
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    /// An inbound message could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Session state machine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid session parameters: {0}")]
    InvalidParameters(String),

    #[error("Operation not allowed in phase {phase}: {reason}")]
    NotAllowed {
        phase: crate::session::Phase,
        reason: &'static str,
    },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
