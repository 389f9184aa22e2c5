//! Transport channel
//!
//! A duplex message channel with named destinations. Control messages and
//! audio frames leave through [`Transport::send`]; inbound messages are
//! pushed to handlers registered with [`Channel::subscribe`]. How the bytes
//! actually move is up to a [`Connector`].
//!
//! Two connectors ship with the crate: [`ws::WsConnector`] for the remote
//! service and [`memory::MemoryConnector`], an in-process link for hosts
//! that run the server side themselves.

pub mod channel;
/// In-process transport, public for embedding
pub mod memory;
pub mod ws;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::error::TransportError;

pub use channel::{Attachment, Channel, Handler, LinkLostHook};

/// Inbound destinations (remote → core)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Status,
    Audio,
    Transcript,
    Report,
    Error,
    Text,
}

impl Destination {
    pub const ALL: [Destination; 6] = [
        Destination::Status,
        Destination::Audio,
        Destination::Transcript,
        Destination::Report,
        Destination::Error,
        Destination::Text,
    ];

    /// Wire path of the destination
    pub fn path(&self) -> &'static str {
        match self {
            Destination::Status => "/user/queue/status",
            Destination::Audio => "/user/queue/audio",
            Destination::Transcript => "/user/queue/transcript",
            Destination::Report => "/user/queue/report",
            Destination::Error => "/user/queue/error",
            Destination::Text => "/user/queue/text",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.path() == path)
    }
}

/// Outbound destinations (core → remote)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outbound {
    Start,
    Audio,
    End,
    MicOff,
}

impl Outbound {
    pub fn path(&self) -> &'static str {
        match self {
            Outbound::Start => "/app/interview/start",
            Outbound::Audio => "/app/interview/audio",
            Outbound::End => "/app/interview/end",
            Outbound::MicOff => "/app/interview/mic-off",
        }
    }
}

/// Body of an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text-safe body (JSON or wire-encoded audio)
    Text(String),
    /// Raw binary body (PCM16 audio)
    Binary(Bytes),
    /// Control signal without a body
    Empty,
}

/// A message leaving the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub destination: Outbound,
    pub payload: Payload,
}

/// A message arriving at the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub destination: Destination,
    pub body: String,
}

/// Sending side of a channel as seen by producers
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Fire-and-forget send
    fn send(&self, destination: Outbound, payload: Payload) -> Result<(), TransportError>;
}

/// Establishes the concrete link behind a [`Channel`]
pub trait Connector: Send + Sync {
    /// Attach `channel` to a live link, or fail with
    /// [`TransportError::Connection`]. Never retries.
    fn connect<'a>(&'a self, channel: &'a Channel) -> BoxFuture<'a, Result<(), TransportError>>;
}
