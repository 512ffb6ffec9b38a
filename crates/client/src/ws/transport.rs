//! The "create connection" capability the manager is given by its host.

use tokio::sync::mpsc::UnboundedSender;

/// Callbacks a transport reports, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    /// Diagnostic only; a `Closed` always follows when the connection dies.
    Error(String),
    Closed { reason: Option<String> },
}

/// Sink for the events of one transport.
///
/// Each sink is stamped with the generation of the connection it belongs
/// to, so events from a superseded transport can be told apart.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEvents {
    pub(crate) fn new(generation: u64, tx: UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Report an event. Returns `false` once the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("transport failure: {0}")]
    Other(String),
}

/// Write half of a live connection. Exclusively owned by the manager.
pub trait Transport: Send {
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    fn close(&mut self);
}

/// Opens transports. Must not block: the connection is established in the
/// background and reported through `events`.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport>;
}
