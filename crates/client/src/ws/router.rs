//! Typed publish/subscribe for server events and connection lifecycle.
//!
//! Listeners return `anyhow::Result<()>`. A listener that errors or panics is
//! logged and skipped; the remaining listeners still run and the caller of
//! `dispatch` never sees the failure.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use parley_shared::ServerEvent;

/// A registered callback.
pub(crate) type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Connection lifecycle detail, richer than the boolean connection channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A transport is being opened. `attempt` is 0 for a host-initiated connect.
    Connecting { attempt: u32 },
    /// Transport open and handshake written.
    Connected,
    Disconnected,
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The attempt ceiling was reached; no further reconnects will happen
    /// until the host calls `connect()` again.
    GaveUp { attempts: u32 },
    /// The identity store failed. Shown to the user as a persistent error.
    StoreFailed { reason: String },
}

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: 'static> Detach for Mutex<Registry<T>> {
    fn detach(&self, id: u64) {
        let mut registry = self.lock().unwrap_or_else(PoisonError::into_inner);
        registry.entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Handle for one registration. Dropping it does not unsubscribe.
pub struct Subscription {
    registry: Weak<dyn Detach>,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Remove exactly this registration. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(registry) = self.registry.upgrade() {
                registry.detach(self.id);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// An unordered set of listeners for one value type.
pub(crate) struct ListenerSet<T> {
    name: &'static str,
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(listener)));

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        let registry: Weak<dyn Detach> = weak;
        Subscription {
            registry,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Invoke every listener registered at the time of the call.
    ///
    /// Returns how many listeners failed.
    pub fn dispatch(&self, value: &T) -> usize {
        let listeners: Vec<(u64, Listener<T>)> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.entries.clone()
        };

        let mut failures = 0;
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    crate::log_error!("{} listener #{} failed: {:#}", self.name, id, err);
                }
                Err(panic) => {
                    failures += 1;
                    crate::log_error!(
                        "{} listener #{} panicked: {}",
                        self.name,
                        id,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        failures
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.entries.len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// The three fan-out channels a host can observe.
pub struct EventRouter {
    events: ListenerSet<ServerEvent>,
    connection: ListenerSet<bool>,
    lifecycle: ListenerSet<LifecycleEvent>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            events: ListenerSet::new("event"),
            connection: ListenerSet::new("connection"),
            lifecycle: ListenerSet::new("lifecycle"),
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(listener)
    }

    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        self.events.dispatch(event)
    }

    pub fn on_connection_change(
        &self,
        listener: impl Fn(bool) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.connection.subscribe(move |connected: &bool| listener(*connected))
    }

    pub fn notify_connection(&self, connected: bool) -> usize {
        self.connection.dispatch(&connected)
    }

    pub fn on_lifecycle(
        &self,
        listener: impl Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.lifecycle.subscribe(listener)
    }

    pub fn notify_lifecycle(&self, event: &LifecycleEvent) -> usize {
        self.lifecycle.dispatch(event)
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
