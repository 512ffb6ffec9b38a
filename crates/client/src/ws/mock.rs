//! In-process connector for driving the manager from tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::transport::{Connector, Transport, TransportError, TransportEvent, TransportEvents};

pub(crate) struct MockConnector {
    opened: UnboundedSender<MockConnection>,
    count: AtomicUsize,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, UnboundedReceiver<MockConnection>) {
        let (opened, rx) = unbounded_channel();
        let connector = Arc::new(Self {
            opened,
            count: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Transports created so far.
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.opened.send(MockConnection {
            url: url.to_string(),
            events,
            sent: sent.clone(),
            closed: closed.clone(),
        });
        Box::new(MockTransport { sent, closed })
    }
}

/// Test-side view of one transport: inject callbacks, inspect writes.
pub(crate) struct MockConnection {
    pub(crate) url: String,
    events: TransportEvents,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    pub(crate) fn open(&self) {
        self.events.emit(TransportEvent::Opened);
    }

    pub(crate) fn message(&self, text: &str) {
        self.events.emit(TransportEvent::Message(text.to_string()));
    }

    pub(crate) fn error(&self, reason: &str) {
        self.events.emit(TransportEvent::Error(reason.to_string()));
    }

    pub(crate) fn close(&self) {
        self.events.emit(TransportEvent::Closed { reason: None });
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
