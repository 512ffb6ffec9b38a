//! WebSocket transport using tokio-tungstenite.

use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::transport::{Connector, Transport, TransportError, TransportEvent, TransportEvents};

/// How long the TCP connect plus upgrade may take before the attempt fails.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects over `ws://` / `wss://`. Requires a Tokio runtime.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport> {
        let (sender, receiver) = unbounded();
        tokio::spawn(run_socket(
            url.to_string(),
            self.connect_timeout,
            events,
            receiver,
        ));
        Box::new(WsTransport { sender })
    }
}

/// Write handle for one socket task. Frames are queued in order.
struct WsTransport {
    sender: UnboundedSender<Message>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sender
            .unbounded_send(Message::Text(text.into()))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        let _ = self.sender.unbounded_send(Message::Close(None));
        self.sender.close_channel();
    }
}

async fn run_socket(
    url: String,
    connect_timeout: Duration,
    events: TransportEvents,
    mut outbound: UnboundedReceiver<Message>,
) {
    let connected = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws_stream, _response))) => Ok(ws_stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no handshake within {:?}", connect_timeout)),
    };
    let ws_stream = match connected {
        Ok(ws_stream) => ws_stream,
        Err(reason) => {
            events.emit(TransportEvent::Error(format!(
                "connect to {} failed: {}",
                url, reason
            )));
            events.emit(TransportEvent::Closed {
                reason: Some(reason),
            });
            return;
        }
    };

    crate::log_debug!("Socket to {} open", url);
    if !events.emit(TransportEvent::Opened) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();
    let mut reason = None;

    loop {
        tokio::select! {
            outgoing = outbound.next() => match outgoing {
                Some(msg) => {
                    let closing = matches!(msg, Message::Close(_));
                    if let Err(e) = write.send(msg).await {
                        events.emit(TransportEvent::Error(format!("send failed: {}", e)));
                        reason = Some(e.to_string());
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                None => {
                    // Transport handle dropped
                    let _ = write.close().await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(text.as_str().to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary is not part of the protocol
                }
                Some(Err(e)) => {
                    events.emit(TransportEvent::Error(format!("read failed: {}", e)));
                    reason = Some(e.to_string());
                    break;
                }
                None => break,
            },
        }
    }

    crate::log_debug!("Socket to {} finished", url);
    events.emit(TransportEvent::Closed { reason });
}
