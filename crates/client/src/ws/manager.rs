//! The connection state machine.
//!
//! One [`ConnectionManager`] owns one socket. Transport callbacks are funnelled
//! through a channel into a single driver task, so they are handled one at a
//! time and in order. Host calls (`connect`, `send`, ...) take the same lock
//! as the driver, which is never held across an await or while listeners run.
//!
//! Notices for listeners are queued under that lock, in the order the state
//! changes happened, and delivered by whichever caller finds no delivery in
//! progress. A call made while another thread (or a listener further up the
//! stack) is delivering returns once its notices are queued.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use parley_shared::{parse_server_frame, ClientFrame, ServerEvent};
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::reconnect::ReconnectPolicy;
use super::router::{EventRouter, LifecycleEvent, Subscription};
use super::transport::{Connector, Transport, TransportEvent, TransportEvents};
use crate::config::ClientConfig;
use crate::identity::IdentityStore;
use crate::storage::StoreError;

/// Connection state for the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// Something to tell listeners, queued in commit order.
enum Notice {
    Connection(bool),
    Lifecycle(LifecycleEvent),
    Event(ServerEvent),
}

struct Inner {
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    /// Bumped for every new transport and on disconnect; events stamped with
    /// any other value are ignored.
    generation: u64,
    /// Set by `disconnect()`; cleared by `connect()`.
    stay_closed: bool,
    policy: ReconnectPolicy,
    retry_timer: Option<JoinHandle<()>>,
    /// Bumped whenever a pending timer is cancelled or replaced.
    timer_epoch: u64,
    outbox: VecDeque<Notice>,
    /// Someone is draining `outbox`.
    delivering: bool,
}

impl Inner {
    fn cancel_retry(&mut self) {
        self.timer_epoch += 1;
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel_retry();
    }
}

struct Shared {
    url: String,
    connector: Arc<dyn Connector>,
    identity: IdentityStore,
    router: EventRouter,
    events_tx: UnboundedSender<(u64, TransportEvent)>,
    inner: Mutex<Inner>,
}

/// Owns the chat socket: handshake, inbound routing, reconnect with backoff.
///
/// Create one at startup and hand clones to whatever needs it; clones share
/// the same connection. Must be constructed inside a Tokio runtime. Call
/// [`disconnect`](Self::disconnect) at shutdown; dropping the last clone
/// also tears the connection down.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        identity: IdentityStore,
    ) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        let shared = Arc::new(Shared {
            url: config.url.clone(),
            connector,
            identity,
            router: EventRouter::new(),
            events_tx,
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                transport: None,
                generation: 0,
                stay_closed: false,
                policy: ReconnectPolicy::new(config.reconnect.clone()),
                retry_timer: None,
                timer_epoch: 0,
                outbox: VecDeque::new(),
                delivering: false,
            }),
        });

        tokio::spawn(drive(Arc::downgrade(&shared), events_rx));

        Self { shared }
    }

    /// Open the socket. No-op while already connecting or open.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Close the socket and stop reconnecting until the next `connect()`.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Serialize and write `payload` if the socket is open.
    ///
    /// Frames are never queued: while not open the payload is dropped with a
    /// warning and `false` is returned.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.shared.send_text(text),
            Err(e) => {
                crate::log_error!("Failed to serialize outbound frame: {}", e);
                false
            }
        }
    }

    /// Send a user chat message.
    pub fn send_message(&self, content: &str) -> bool {
        self.send(&ClientFrame::Message {
            content: content.to_string(),
        })
    }

    pub fn on_event(
        &self,
        listener: impl Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.router.subscribe(listener)
    }

    pub fn on_connection_change(
        &self,
        listener: impl Fn(bool) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.router.on_connection_change(listener)
    }

    pub fn on_lifecycle(
        &self,
        listener: impl Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.router.on_lifecycle(listener)
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.shared.identity
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish()
    }
}

/// Handle transport events one at a time until the manager goes away.
async fn drive(shared: Weak<Shared>, mut events: UnboundedReceiver<(u64, TransportEvent)>) {
    while let Some((generation, event)) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_transport_event(generation, event);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(&self) {
        let mut inner = self.lock();
        if matches!(
            inner.state,
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            crate::log_debug!("connect() ignored, already {:?}", inner.state);
            return;
        }
        inner.stay_closed = false;
        inner.cancel_retry();
        inner.policy.reset();
        let notices = self.open_transport(&mut inner, 0);
        self.publish(inner, notices);
    }

    fn disconnect(&self) {
        let mut inner = self.lock();
        inner.stay_closed = true;
        inner.cancel_retry();
        inner.generation += 1;
        if let Some(mut transport) = inner.transport.take() {
            transport.close();
        }
        let previous = std::mem::replace(&mut inner.state, ConnectionState::Closed);
        crate::log_info!("Disconnected from {} ({:?} -> Closed)", self.url, previous);
        let notices = match previous {
            ConnectionState::Open => vec![
                Notice::Connection(false),
                Notice::Lifecycle(LifecycleEvent::Disconnected),
            ],
            ConnectionState::Connecting => vec![Notice::Lifecycle(LifecycleEvent::Disconnected)],
            ConnectionState::Idle | ConnectionState::Closed => Vec::new(),
        };
        self.publish(inner, notices);
    }

    fn send_text(&self, text: String) -> bool {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Open {
            crate::log_warn!("Dropping outbound frame, socket is {:?}", inner.state);
            return false;
        }
        let Some(transport) = inner.transport.as_mut() else {
            return false;
        };
        match transport.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                crate::log_error!("Send to {} failed: {}", self.url, e);
                false
            }
        }
    }

    fn open_transport(&self, inner: &mut Inner, attempt: u32) -> Vec<Notice> {
        inner.generation += 1;
        let events = TransportEvents::new(inner.generation, self.events_tx.clone());
        crate::log_info!("Connecting to {} (attempt {})", self.url, attempt);
        inner.transport = Some(self.connector.connect(&self.url, events));
        inner.state = ConnectionState::Connecting;
        vec![Notice::Lifecycle(LifecycleEvent::Connecting { attempt })]
    }

    fn handle_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        let mut inner = self.lock();
        if generation != inner.generation || inner.transport.is_none() {
            crate::log_debug!(
                "Ignoring event from superseded transport #{} (current #{})",
                generation,
                inner.generation
            );
            return;
        }
        // Handled under the lock so a concurrent disconnect() cannot slip in
        // between the generation check and the session token write.
        let notices = match event {
            TransportEvent::Opened => self.on_open(&mut inner),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Error(reason) => {
                // The close that follows drives state and retries.
                crate::log_error!("Socket error on {}: {}", self.url, reason);
                Vec::new()
            }
            TransportEvent::Closed { reason } => self.on_close(&mut inner, reason),
        };
        self.publish(inner, notices);
    }

    fn on_open(&self, inner: &mut Inner) -> Vec<Notice> {
        let handshake = match self.handshake() {
            Ok(handshake) => handshake,
            Err(e) => {
                crate::log_error!("Cannot build handshake, identity store failed: {}", e);
                inner.stay_closed = true;
                inner.generation += 1;
                if let Some(mut transport) = inner.transport.take() {
                    transport.close();
                }
                inner.state = ConnectionState::Closed;
                return vec![
                    Notice::Lifecycle(LifecycleEvent::StoreFailed {
                        reason: e.to_string(),
                    }),
                    Notice::Lifecycle(LifecycleEvent::Disconnected),
                ];
            }
        };

        inner.state = ConnectionState::Open;
        inner.policy.reset();

        // Written before the lock is released so nothing can overtake it.
        if let Some(transport) = inner.transport.as_mut() {
            if let Err(e) = transport.send_text(handshake) {
                crate::log_error!("Handshake write to {} failed: {}", self.url, e);
            }
        }

        crate::log_info!("Connected to {}", self.url);
        vec![
            Notice::Connection(true),
            Notice::Lifecycle(LifecycleEvent::Connected),
        ]
    }

    fn handshake(&self) -> Result<String, StoreError> {
        let frame = ClientFrame::Init {
            user_id: self.identity.get_or_create_client_id()?,
            session_id: self.identity.session_token()?,
        };
        serde_json::to_string(&frame).map_err(|source| StoreError::Encoding {
            key: "init".to_string(),
            source,
        })
    }

    fn on_message(&self, text: &str) -> Vec<Notice> {
        let event = match parse_server_frame(text) {
            Ok(event) => event,
            Err(e) => {
                crate::log_warn!("Dropping malformed frame from {}: {}", self.url, e);
                return Vec::new();
            }
        };

        let mut notices = Vec::with_capacity(2);
        if let Some(token) = event.session_token() {
            match self.identity.store_session_token(token) {
                Ok(()) => crate::log_info!("Session established: {}", token),
                Err(e) => {
                    crate::log_error!("Failed to persist session token: {}", e);
                    notices.push(Notice::Lifecycle(LifecycleEvent::StoreFailed {
                        reason: e.to_string(),
                    }));
                }
            }
        }
        notices.push(Notice::Event(event));
        notices
    }

    fn on_close(self: &Arc<Self>, inner: &mut Inner, reason: Option<String>) -> Vec<Notice> {
        inner.transport = None;
        inner.state = ConnectionState::Closed;
        crate::log_info!(
            "Connection to {} closed: {}",
            self.url,
            reason.as_deref().unwrap_or("no reason given")
        );

        let mut notices = vec![
            Notice::Connection(false),
            Notice::Lifecycle(LifecycleEvent::Disconnected),
        ];
        if inner.stay_closed {
            return notices;
        }

        let attempts = inner.policy.attempt();
        if inner.policy.should_retry(attempts) {
            let attempt = inner.policy.advance();
            let delay = inner.policy.next_delay(attempt);
            crate::log_info!(
                "Reconnecting to {} in {:?} (attempt {})",
                self.url,
                delay,
                attempt
            );
            self.schedule_reconnect(inner, attempt, delay);
            notices.push(Notice::Lifecycle(LifecycleEvent::ReconnectScheduled {
                attempt,
                delay,
            }));
        } else {
            crate::log_error!(
                "Giving up on {} after {} reconnect attempts",
                self.url,
                attempts
            );
            notices.push(Notice::Lifecycle(LifecycleEvent::GaveUp { attempts }));
        }
        notices
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner, attempt: u32, delay: Duration) {
        inner.cancel_retry();
        let epoch = inner.timer_epoch;
        let shared = Arc::downgrade(self);
        inner.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.reconnect_due(epoch, attempt);
            }
        }));
    }

    fn reconnect_due(&self, epoch: u64, attempt: u32) {
        let mut inner = self.lock();
        if inner.stay_closed || epoch != inner.timer_epoch || inner.state != ConnectionState::Closed
        {
            crate::log_debug!("Reconnect timer #{} no longer wanted", epoch);
            return;
        }
        inner.retry_timer = None;
        let notices = self.open_transport(&mut inner, attempt);
        self.publish(inner, notices);
    }

    /// Queue `notices` behind everything already committed, release the lock
    /// and deliver unless another caller is already delivering.
    fn publish<'a>(&'a self, mut inner: MutexGuard<'a, Inner>, notices: Vec<Notice>) {
        inner.outbox.extend(notices);
        if inner.delivering {
            return;
        }
        inner.delivering = true;
        loop {
            let Some(notice) = inner.outbox.pop_front() else {
                inner.delivering = false;
                return;
            };
            drop(inner);
            self.deliver(notice);
            inner = self.lock();
        }
    }

    fn deliver(&self, notice: Notice) {
        match notice {
            Notice::Connection(connected) => {
                self.router.notify_connection(connected);
            }
            Notice::Lifecycle(event) => {
                self.router.notify_lifecycle(&event);
            }
            Notice::Event(event) => {
                self.router.dispatch(&event);
            }
        }
    }
}
