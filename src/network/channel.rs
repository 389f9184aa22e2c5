//! Channel handle shared by producers, subscribers and connectors

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Destination, InboundFrame, Outbound, OutboundFrame, Payload, Transport};
use crate::error::TransportError;

/// Inbound message handler; receives the message body
pub type Handler = Arc<dyn Fn(&str) + Send + Sync>;

/// Called when the live link goes away on its own
pub type LinkLostHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct LinkState {
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    generation: u64,
}

struct ChannelInner {
    link: Mutex<LinkState>,
    connected: AtomicBool,
    handlers: RwLock<HashMap<Destination, Vec<Handler>>>,
    link_lost: RwLock<Vec<LinkLostHook>>,
}

/// One attachment of a channel to a link
pub struct Attachment {
    /// Identifies this link; inbound frames and link loss are reported with it
    pub generation: u64,
    /// Frames to write onto the link
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

/// Cloneable handle to one duplex channel.
///
/// A channel starts disconnected. A [`super::Connector`] attaches it to a
/// live link and feeds inbound frames to [`Channel::dispatch`]. Every attach
/// starts a new generation; frames and link-loss reports from an older
/// generation are dropped.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                link: Mutex::new(LinkState::default()),
                connected: AtomicBool::new(false),
                handlers: RwLock::new(HashMap::new()),
                link_lost: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a handler for an inbound destination. Handlers for one
    /// destination run in registration order.
    pub fn subscribe(&self, destination: Destination, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.inner
            .handlers
            .write()
            .entry(destination)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Register a hook for links that end without a local disconnect
    pub fn on_link_lost(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.link_lost.write().push(Arc::new(hook));
    }

    /// Deliver an inbound frame from link `generation` to its subscribers.
    /// Frames from a link that is no longer current are dropped.
    pub fn dispatch(&self, generation: u64, frame: InboundFrame) {
        if !self.is_current(generation) {
            tracing::debug!(
                generation,
                destination = frame.destination.path(),
                "Dropping inbound message from a closed link"
            );
            return;
        }

        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .get(&frame.destination)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!(destination = frame.destination.path(), "No subscriber for inbound message");
            return;
        }
        for handler in handlers {
            handler(&frame.body);
        }
    }

    /// Open a fresh outbound queue under a new generation and mark the
    /// channel connected. The connector drains the queue onto the link.
    pub fn attach(&self) -> Attachment {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut link = self.inner.link.lock();
        link.generation += 1;
        link.outbound = Some(tx);
        self.inner.connected.store(true, Ordering::SeqCst);
        Attachment {
            generation: link.generation,
            outbound: rx,
        }
    }

    /// Drop the outbound queue and mark the channel disconnected
    pub fn disconnect(&self) {
        let mut link = self.inner.link.lock();
        self.inner.connected.store(false, Ordering::SeqCst);
        link.outbound.take();
    }

    /// Report that link `generation` ended on its own. Only the current
    /// link disconnects the channel and fires the link-lost hooks; returns
    /// whether it did.
    pub fn link_lost(&self, generation: u64) -> bool {
        {
            let mut link = self.inner.link.lock();
            if link.generation != generation || !self.inner.connected.load(Ordering::SeqCst) {
                return false;
            }
            self.inner.connected.store(false, Ordering::SeqCst);
            link.outbound.take();
        }
        tracing::warn!(generation, "Link lost");

        let hooks: Vec<LinkLostHook> = self.inner.link_lost.read().clone();
        for hook in hooks {
            hook();
        }
        true
    }

    /// Generation of the most recent attach
    pub fn generation(&self) -> u64 {
        self.inner.link.lock().generation
    }

    fn is_current(&self, generation: u64) -> bool {
        let link = self.inner.link.lock();
        link.generation == generation && self.inner.connected.load(Ordering::SeqCst)
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for Channel {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn send(&self, destination: Outbound, payload: Payload) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let link = self.inner.link.lock();
        let Some(tx) = link.outbound.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        tx.send(OutboundFrame {
            destination,
            payload,
        })
        .map_err(|_| TransportError::SendFailed("link closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_requires_connection() {
        let channel = Channel::new();
        assert_eq!(
            channel.send(Outbound::End, Payload::Empty),
            Err(TransportError::NotConnected)
        );

        let mut rx = channel.attach().outbound;
        channel.send(Outbound::End, Payload::Empty).unwrap();
        assert_eq!(rx.try_recv().unwrap().destination, Outbound::End);

        channel.disconnect();
        assert!(!channel.is_connected());
        assert_eq!(
            channel.send(Outbound::End, Payload::Empty),
            Err(TransportError::NotConnected)
        );
    }

    #[test]
    fn test_send_fails_when_link_dropped() {
        let channel = Channel::new();
        drop(channel.attach());
        assert!(matches!(
            channel.send(Outbound::MicOff, Payload::Empty),
            Err(TransportError::SendFailed(_))
        ));
    }

    #[test]
    fn test_dispatch_is_ordered_per_destination() {
        let channel = Channel::new();
        let generation = channel.attach().generation;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        channel.subscribe(Destination::Status, move |body| first.lock().push(format!("a:{body}")));
        let second = seen.clone();
        channel.subscribe(Destination::Status, move |body| second.lock().push(format!("b:{body}")));
        let text = seen.clone();
        channel.subscribe(Destination::Text, move |body| text.lock().push(format!("t:{body}")));

        for body in ["1", "2"] {
            channel.dispatch(generation, InboundFrame {
                destination: Destination::Status,
                body: body.to_string(),
            });
        }
        channel.dispatch(generation, InboundFrame {
            destination: Destination::Report,
            body: "ignored".to_string(),
        });

        assert_eq!(*seen.lock(), vec!["a:1", "b:1", "a:2", "b:2"]);
    }

    fn status(body: &str) -> InboundFrame {
        InboundFrame {
            destination: Destination::Status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_dispatch_drops_frames_from_closed_links() {
        let channel = Channel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.subscribe(Destination::Status, move |body| sink.lock().push(body.to_string()));

        let old = channel.attach().generation;
        channel.dispatch(old, status("live"));

        // Local disconnect cuts delivery at once
        channel.disconnect();
        channel.dispatch(old, status("after-disconnect"));

        // A reattached channel ignores the previous link
        let new = channel.attach().generation;
        assert!(new > old);
        channel.dispatch(old, status("stale"));
        channel.dispatch(new, status("fresh"));

        assert_eq!(*seen.lock(), vec!["live", "fresh"]);
    }

    #[test]
    fn test_link_lost_only_for_current_link() {
        let channel = Channel::new();
        let lost = Arc::new(Mutex::new(0));
        let counter = lost.clone();
        channel.on_link_lost(move || *counter.lock() += 1);

        let old = channel.attach().generation;
        let new = channel.attach();

        // A stale reader finishing must not take down the new link
        assert!(!channel.link_lost(old));
        assert!(channel.is_connected());
        assert_eq!(*lost.lock(), 0);

        assert!(channel.link_lost(new.generation));
        assert!(!channel.is_connected());
        assert_eq!(*lost.lock(), 1);

        // Reported once
        assert!(!channel.link_lost(new.generation));
        assert_eq!(*lost.lock(), 1);
    }

    #[test]
    fn test_local_disconnect_fires_no_hook() {
        let channel = Channel::new();
        let lost = Arc::new(Mutex::new(0));
        let counter = lost.clone();
        channel.on_link_lost(move || *counter.lock() += 1);

        let generation = channel.attach().generation;
        channel.disconnect();
        assert!(!channel.link_lost(generation));
        assert_eq!(*lost.lock(), 0);
    }
}
