//! In-process connector
//!
//! Links a [`Channel`] to a [`MemoryRemote`] that plays the server side:
//! it sees everything the core sends and can push inbound messages. Use it
//! to embed the session core next to a server in the same process, or to
//! drive a session without a socket.

use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Channel, Connector, Destination, InboundFrame, OutboundFrame};
use crate::error::TransportError;

#[derive(Default)]
struct Link {
    channel: Option<Channel>,
    generation: u64,
    outbound: Option<mpsc::UnboundedReceiver<OutboundFrame>>,
    received: Vec<OutboundFrame>,
    refuse_with: Option<String>,
}

/// Connector half
pub struct MemoryConnector {
    link: Arc<Mutex<Link>>,
}

/// Remote half
#[derive(Clone)]
pub struct MemoryRemote {
    link: Arc<Mutex<Link>>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryRemote) {
        let link = Arc::new(Mutex::new(Link::default()));
        (Self { link: link.clone() }, MemoryRemote { link })
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, channel: &'a Channel) -> BoxFuture<'a, Result<(), TransportError>> {
        let mut link = self.link.lock();
        if let Some(reason) = link.refuse_with.clone() {
            return Box::pin(future::ready(Err(TransportError::Connection(reason))));
        }
        let attachment = channel.attach();
        link.generation = attachment.generation;
        link.outbound = Some(attachment.outbound);
        link.channel = Some(channel.clone());
        Box::pin(future::ready(Ok(())))
    }
}

impl MemoryRemote {
    /// Make the next connection attempts fail
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        self.link.lock().refuse_with = Some(reason.into());
    }

    /// Push an inbound message to the core
    pub fn push(&self, destination: Destination, body: impl Into<String>) {
        let (channel, generation) = {
            let link = self.link.lock();
            (link.channel.clone(), link.generation)
        };
        match channel {
            Some(channel) => channel.dispatch(generation, InboundFrame {
                destination,
                body: body.into(),
            }),
            None => tracing::warn!(destination = destination.path(), "Push on unconnected memory link"),
        }
    }

    /// Close the link from the remote side
    pub fn close(&self) {
        let (channel, generation) = {
            let mut link = self.link.lock();
            link.outbound.take();
            (link.channel.take(), link.generation)
        };
        if let Some(channel) = channel {
            channel.link_lost(generation);
        }
    }

    /// Take everything sent so far
    pub fn drain_outbound(&self) -> Vec<OutboundFrame> {
        let mut link = self.link.lock();
        Self::pump(&mut link);
        std::mem::take(&mut link.received)
    }

    /// Number of sent messages not yet drained
    pub fn outbound_len(&self) -> usize {
        let mut link = self.link.lock();
        Self::pump(&mut link);
        link.received.len()
    }

    fn pump(link: &mut Link) {
        let Link {
            outbound, received, ..
        } = link;
        if let Some(rx) = outbound.as_mut() {
            while let Ok(frame) = rx.try_recv() {
                received.push(frame);
            }
        }
    }
}
