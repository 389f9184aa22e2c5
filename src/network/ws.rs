//! WebSocket connector
//!
//! Text frames carry a JSON envelope naming the destination:
//!
//! ```text
//! {"destination": "/user/queue/status", "body": "{\"type\":\"CONNECTED\"}"}
//! ```
//!
//! Binary frames carry raw PCM16 audio and have no envelope.

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Channel, Connector, Destination, InboundFrame, Outbound, OutboundFrame, Payload};
use crate::codec::to_wire_format;
use crate::error::TransportError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    destination: String,
    #[serde(default)]
    body: String,
}

/// Connects a channel to a WebSocket endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect<'a>(&'a self, channel: &'a Channel) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let (socket, _response) = connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            tracing::info!(url = %self.url, "WebSocket connected");

            let (sink, stream) = socket.split();
            let attachment = channel.attach();
            tokio::spawn(write_loop(sink, attachment.outbound));
            tokio::spawn(read_loop(stream, channel.clone(), attachment.generation));
            Ok(())
        })
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        let message = match encode_outbound(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Failed to encode outbound message: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(message).await {
            tracing::error!("WebSocket send failed: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
    tracing::debug!("WebSocket writer finished");
}

async fn read_loop(mut stream: SplitStream<Socket>, channel: Channel, generation: u64) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by remote");
                break;
            }
            Ok(message) => match decode_inbound(message) {
                Ok(Some(frame)) => channel.dispatch(generation, frame),
                Ok(None) => {}
                Err(e) => tracing::warn!("{}", e),
            },
            Err(e) => {
                tracing::error!("WebSocket receive failed: {}", e);
                break;
            }
        }
    }
    // Stale or locally closed links are ignored by the channel
    if !channel.link_lost(generation) {
        tracing::debug!(generation, "WebSocket reader finished on an inactive link");
    }
}

/// Frame an outbound message for the socket
fn encode_outbound(frame: &OutboundFrame) -> Result<Message, TransportError> {
    let body = match &frame.payload {
        Payload::Binary(bytes) if frame.destination == Outbound::Audio => {
            return Ok(Message::Binary(bytes.to_vec()));
        }
        Payload::Binary(bytes) => to_wire_format(bytes),
        Payload::Text(text) => text.clone(),
        Payload::Empty => String::new(),
    };
    let envelope = Envelope {
        destination: frame.destination.path().to_string(),
        body,
    };
    serde_json::to_string(&envelope)
        .map(Message::Text)
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Turn a socket message into an inbound frame. Control frames yield `None`.
fn decode_inbound(message: Message) -> Result<Option<InboundFrame>, TransportError> {
    match message {
        Message::Text(text) => {
            let envelope: Envelope = serde_json::from_str(&text)
                .map_err(|e| TransportError::Protocol(format!("bad envelope: {e}")))?;
            let destination = Destination::from_path(&envelope.destination).ok_or_else(|| {
                TransportError::Protocol(format!("unknown destination {}", envelope.destination))
            })?;
            Ok(Some(InboundFrame {
                destination,
                body: envelope.body,
            }))
        }
        Message::Binary(bytes) => {
            let body = serde_json::json!({ "data": to_wire_format(&bytes) }).to_string();
            Ok(Some(InboundFrame {
                destination: Destination::Audio,
                body,
            }))
        }
        _ => Ok(None),
    }
}
