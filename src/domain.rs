//! Typed access to a single protocol domain.

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cdpmux_types::{CommandResponse, Domain, DomainCommand, DomainEvents, Event};

use crate::error::{CdpError, Result};
use crate::session::{Session, Subscription};
use crate::subscribe::{panic_message, EventHandler, EventKey, ListenerId, RawEvent};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of listeners that all receive the same value
struct Multicast<T> {
    listeners: Arc<Mutex<Vec<(ListenerId, Listener<T>)>>>,
    next_id: Arc<AtomicUsize>,
}

impl<T> Clone for Multicast<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for Multicast<T> {
    fn default() -> Self {
        Self {
            listeners: Default::default(),
            next_id: Arc::new(AtomicUsize::new(1)),
        }
    }
}

impl<T> Multicast<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener<T>)>> {
        // a panicking listener is never invoked while the lock is held
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let len = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != len
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Invokes every listener in registration order, a panicking listener
    /// does not prevent the others from running
    fn emit(&self, value: &T) -> Result<()> {
        // listeners may register or remove listeners
        let listeners: Vec<_> = self.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        let mut panicked = None;
        for listener in listeners {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener(value))) {
                panicked = Some(panic_message(&*panic));
            }
        }
        match panicked {
            Some(msg) => Err(CdpError::ListenerPanicked(msg)),
            None => Ok(()),
        }
    }
}

/// Converts the raw events of a domain into its typed event enum
struct DomainEventHandler<D: Domain> {
    events: Multicast<D::Event>,
}

impl<D: Domain> EventHandler for DomainEventHandler<D> {
    fn on_event(&mut self, event: &RawEvent) -> Result<()> {
        match D::Event::from_method(&event.method, event.params.clone())? {
            Some(event) => self.events.emit(&event),
            None => Err(CdpError::msg(format!(
                "`{}` is not an event of {}",
                event.method,
                D::NAME
            ))),
        }
    }
}

/// A typed facade over the commands and events of the domain `D`.
///
/// On creation a listener for every event of the domain is registered with
/// the session, the events are re-raised to the listeners added via
/// [`DomainAdapter::on_event`] and [`DomainAdapter::on`]. Once disposed, all
/// listeners are removed and commands fail with [`CdpError::InvalidState`].
///
/// Creating the adapter does not enable the domain, send its `enable`
/// command for that.
pub struct DomainAdapter<D: Domain> {
    session: Session,
    subscriptions: Vec<Subscription>,
    events: Multicast<D::Event>,
    disposed: bool,
    _domain: PhantomData<D>,
}

impl<D: Domain> DomainAdapter<D> {
    pub fn new(session: &Session) -> Result<Self> {
        let events = Multicast::default();
        let mut subscriptions = Vec::with_capacity(D::EVENTS.len());
        for event in D::EVENTS {
            let handler = DomainEventHandler::<D> {
                events: events.clone(),
            };
            subscriptions.push(session.subscribe_handler(EventKey::parse(event), handler)?);
        }
        tracing::debug!(domain = D::NAME, events = subscriptions.len(), "domain adapter");
        Ok(Self {
            session: session.clone(),
            subscriptions,
            events,
            disposed: false,
            _domain: PhantomData,
        })
    }

    /// The session the commands are sent over
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disposed {
            Err(CdpError::InvalidState("domain adapter is disposed"))
        } else {
            Ok(())
        }
    }

    pub async fn execute<C>(&self, cmd: C) -> Result<CommandResponse<C::Response>>
    where
        C: DomainCommand<Domain = D>,
    {
        self.ensure_active()?;
        self.session.execute(cmd).await
    }

    pub async fn execute_with_timeout<C>(
        &self,
        cmd: C,
        timeout: Duration,
    ) -> Result<CommandResponse<C::Response>>
    where
        C: DomainCommand<Domain = D>,
    {
        self.ensure_active()?;
        self.session.execute_with_timeout(cmd, timeout).await
    }

    /// Sends the command without waiting for its response
    pub fn notify<C>(&self, cmd: C) -> Result<()>
    where
        C: DomainCommand<Domain = D>,
    {
        self.ensure_active()?;
        self.session.notify(cmd)
    }

    /// Adds a listener for all events of the domain
    pub fn on_event<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&D::Event) + Send + Sync + 'static,
    {
        self.ensure_active()?;
        Ok(self.events.add(Arc::new(listener)))
    }

    /// Adds a listener for the event `E` of the domain
    pub fn on<E, F>(&self, listener: F) -> Result<ListenerId>
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on_event(move |event: &D::Event| {
            if let Some(event) = event.payload().downcast_ref::<E>() {
                listener(event)
            }
        })
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.events.remove(id)
    }

    /// Number of listeners added to this adapter
    pub fn listeners(&self) -> usize {
        self.events.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Removes all listeners from the session, calling it again is a no-op
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for subscription in self.subscriptions.drain(..) {
            if let Err(err) = subscription.unsubscribe() {
                // a closed handler already dropped all listeners
                tracing::trace!(domain = D::NAME, %err, "unsubscribe");
            }
        }
        self.events.clear();
        tracing::debug!(domain = D::NAME, "domain adapter disposed");
    }
}

impl<D: Domain> Drop for DomainAdapter<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<D: Domain> fmt::Debug for DomainAdapter<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainAdapter")
            .field("domain", &D::NAME)
            .field("listeners", &self.events.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
