use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use fnv::FnvHashMap;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};

use cdpmux_types::{split_identifier, CdpJsonEventMessage, Event};

use crate::error::{CdpError, Result};
use crate::stats::DispatchStats;

/// An event as it was read from the wire
pub type RawEvent = CdpJsonEventMessage;

/// Identifies the listeners of an event: `Network.requestWillBeSent` is
/// `(Network, requestWillBeSent)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub domain: Cow<'static, str>,
    pub event: Cow<'static, str>,
}

impl EventKey {
    pub fn new(domain: impl Into<Cow<'static, str>>, event: impl Into<Cow<'static, str>>) -> Self {
        Self {
            domain: domain.into(),
            event: event.into(),
        }
    }

    /// Splits an event identifier at the first `.`
    pub fn parse(method: &str) -> Self {
        let (domain, event) = split_identifier(method);
        Self::new(domain.to_string(), event.to_string())
    }

    /// The key of a typed event
    pub fn of<E: Event>() -> Self {
        Self::parse(&E::method_id())
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.event)
    }
}

/// Identifies a registered listener, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(usize);

impl ListenerId {
    pub(crate) fn new(id: usize) -> Self {
        ListenerId(id)
    }
}

/// Receives every event of the key it was registered for.
///
/// Handlers are invoked on the dispatch path and must not block, long
/// running work should be handed off.
pub trait EventHandler: Send + 'static {
    fn on_event(&mut self, event: &RawEvent) -> Result<()>;

    /// Closed handlers are removed from the registry
    fn is_closed(&self) -> bool {
        false
    }
}

/// Adapts a closure to [`EventHandler`]
pub(crate) struct FnHandler<F>(pub(crate) F);

impl<F> EventHandler for FnHandler<F>
where
    F: FnMut(&RawEvent) -> Result<()> + Send + 'static,
{
    fn on_event(&mut self, event: &RawEvent) -> Result<()> {
        (self.0)(event)
    }
}

struct Listener {
    id: ListenerId,
    handler: Box<dyn EventHandler>,
}

/// All the currently active listeners
///
/// Listeners are grouped by domain and event name and invoked in
/// registration order.
#[derive(Default)]
pub struct Subscriptions {
    listeners: FnvHashMap<String, FnvHashMap<String, Vec<Listener>>>,
    keys: FnvHashMap<ListenerId, EventKey>,
}

impl Subscriptions {
    pub fn insert(&mut self, key: EventKey, id: ListenerId, handler: Box<dyn EventHandler>) {
        self.listeners
            .entry(key.domain.to_string())
            .or_default()
            .entry(key.event.to_string())
            .or_default()
            .push(Listener { id, handler });
        self.keys.insert(id, key);
    }

    /// Removes the listener, returns `false` if it was not registered
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let Some(key) = self.keys.remove(&id) else {
            return false;
        };
        if let Some(events) = self.listeners.get_mut(key.domain.as_ref()) {
            if let Some(listeners) = events.get_mut(key.event.as_ref()) {
                listeners.retain(|l| l.id != id);
                if listeners.is_empty() {
                    events.remove(key.event.as_ref());
                }
            }
            if events.is_empty() {
                self.listeners.remove(key.domain.as_ref());
            }
        }
        true
    }

    /// Invokes every listener registered for the event's key and returns how
    /// many were invoked.
    ///
    /// A failing or panicking listener is logged and does not affect the
    /// others.
    pub fn dispatch(&mut self, event: &RawEvent, stats: &DispatchStats) -> usize {
        let (domain, name) = split_identifier(&event.method);
        let Some(listeners) = self
            .listeners
            .get_mut(domain)
            .and_then(|events| events.get_mut(name))
        else {
            return 0;
        };

        let mut invoked = 0;
        for listener in listeners.iter_mut() {
            if listener.handler.is_closed() {
                continue;
            }
            invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| listener.handler.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    stats.record_listener_failure();
                    tracing::warn!(
                        method = %event.method,
                        listener = ?listener.id,
                        %err,
                        "event listener failed"
                    );
                }
                Err(panic) => {
                    stats.record_listener_failure();
                    tracing::error!(
                        method = %event.method,
                        listener = ?listener.id,
                        panic = %panic_message(&*panic),
                        "event listener panicked"
                    );
                }
            }
        }

        let closed: Vec<_> = listeners
            .iter()
            .filter(|l| l.handler.is_closed())
            .map(|l| l.id)
            .collect();
        for id in closed {
            tracing::trace!(listener = ?id, "removing closed listener");
            self.remove(id);
        }
        invoked
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
        self.keys.clear();
    }
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("keys", &self.keys)
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Forwards deserialized events into the channel of an [`EventStream`]
pub(crate) struct ChannelHandler<T> {
    tx: UnboundedSender<T>,
}

impl<T> ChannelHandler<T> {
    pub(crate) fn new(tx: UnboundedSender<T>) -> Self {
        Self { tx }
    }
}

impl<T: Event> EventHandler for ChannelHandler<T> {
    fn on_event(&mut self, event: &RawEvent) -> Result<()> {
        let event: T = event.params_as()?;
        self.tx
            .unbounded_send(event)
            .map_err(|_| CdpError::msg("event stream dropped"))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The receiver part of an event subscription, the listener is removed once
/// the stream is dropped
#[must_use = "streams do nothing unless polled"]
pub struct EventStream<T: Event> {
    events: UnboundedReceiver<T>,
}

impl<T: Event> EventStream<T> {
    pub(crate) fn new(events: UnboundedReceiver<T>) -> Self {
        Self { events }
    }
}

impl<T: Event> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("event", &T::method_id())
            .finish()
    }
}

impl<T: Event> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_next_unpin(cx)
    }
}
