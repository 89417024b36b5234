use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedSender};

use cdpmux_types::{Command, CommandResponse, Event, MethodId, Request};

use crate::cmd::{to_command_response, to_result, CommandMessage, Responder};
use crate::conn::Connection;
use crate::error::{CdpError, Result};
use crate::handler::{CommandFuture, Handler, HandlerConfig, HandlerMessage};
use crate::stats::DispatchStats;
use crate::subscribe::{
    ChannelHandler, EventHandler, EventKey, EventStream, FnHandler, ListenerId, RawEvent,
};
use crate::transport::Transport;

/// How [`Session::send_with_mode`] treats the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Wait for the response, at most `timeout` if set
    Await { timeout: Option<Duration> },
    /// Send the command without waiting for a response
    Detached,
}

#[derive(Debug)]
struct SessionInner {
    sender: UnboundedSender<HandlerMessage>,
    next_listener_id: AtomicUsize,
    stats: Arc<DispatchStats>,
    request_timeout: Option<Duration>,
}

/// A handle to a CDP connection driven by a [`Handler`].
///
/// Sessions are cheap to clone, all clones share the same handler.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    /// Target session the commands of this handle are scoped to
    session_id: Option<String>,
}

impl Session {
    /// Creates a session over the transport and the [`Handler`] that drives
    /// it.
    pub fn new(transport: impl Transport, config: HandlerConfig) -> (Self, Handler) {
        let (tx, rx) = unbounded();
        let stats = Arc::new(DispatchStats::default());
        let handler = Handler::new(
            Connection::new(transport),
            rx,
            Arc::clone(&stats),
            &config,
        );
        let inner = SessionInner {
            sender: tx,
            next_listener_id: AtomicUsize::new(1),
            stats,
            request_timeout: config.request_timeout,
        };
        let session = Self {
            inner: Arc::new(inner),
            session_id: None,
        };
        (session, handler)
    }

    /// Connects to the debugger websocket.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use cdpmux::{HandlerConfig, Session};
    /// # use futures::StreamExt;
    /// # async fn demo() -> cdpmux::Result<()> {
    /// let (session, mut handler) =
    ///     Session::connect("ws://127.0.0.1:9222/devtools/browser/id", HandlerConfig::default())
    ///         .await?;
    /// let _handle = async_std::task::spawn(async move {
    ///     while let Some(res) = handler.next().await {
    ///         if let Err(err) = res {
    ///             eprintln!("{}", err);
    ///         }
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(any(feature = "async-std-runtime", feature = "tokio-runtime"))]
    pub async fn connect(
        debug_ws_url: impl AsRef<str>,
        config: HandlerConfig,
    ) -> Result<(Self, Handler)> {
        let transport = crate::transport::WsTransport::connect(debug_ws_url).await?;
        Ok(Self::new(transport, config))
    }

    /// A handle that scopes all commands to the target session `session_id`
    pub fn with_session_id(&self, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            session_id: Some(session_id.into()),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Execute a command and return the typed response.
    ///
    /// The configured request timeout applies.
    pub async fn execute<T: Command>(&self, cmd: T) -> Result<CommandResponse<T::Response>> {
        self.command_future(&cmd, self.inner.request_timeout)?.await
    }

    /// Execute a command and fail with [`CdpError::Timeout`] if there is no
    /// response within `timeout`
    pub async fn execute_with_timeout<T: Command>(
        &self,
        cmd: T,
        timeout: Duration,
    ) -> Result<CommandResponse<T::Response>> {
        self.command_future(&cmd, Some(timeout))?.await
    }

    /// The future that resolves with the response of `cmd`
    pub fn command_future<T: Command>(
        &self,
        cmd: &T,
        timeout: Option<Duration>,
    ) -> Result<CommandFuture<CommandResponse<T::Response>>> {
        let request = CommandMessage::request_for(cmd, self.session_id())?;
        Ok(CommandFuture::new(
            request,
            timeout,
            self.inner.sender.clone(),
            to_command_response::<T>,
        ))
    }

    /// Send an untyped command and return the `result` of the response
    pub async fn send(
        &self,
        method: impl Into<MethodId>,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mode = ResponseMode::Await {
            timeout: self.inner.request_timeout,
        };
        self.send_with_mode(method, params, mode)
            .await?
            .ok_or(CdpError::NoResponse)
    }

    /// Send an untyped command.
    ///
    /// Resolves to `None` in [`ResponseMode::Detached`] once the command is
    /// queued.
    pub async fn send_with_mode(
        &self,
        method: impl Into<MethodId>,
        params: serde_json::Value,
        mode: ResponseMode,
    ) -> Result<Option<serde_json::Value>> {
        let request = self.raw_request(method.into(), params);
        match mode {
            ResponseMode::Await { timeout } => {
                let fut = CommandFuture::new(
                    request,
                    timeout,
                    self.inner.sender.clone(),
                    |resp, _| to_result::<serde_json::Value>(resp),
                );
                Ok(Some(fut.await?))
            }
            ResponseMode::Detached => {
                self.send_detached(request)?;
                Ok(None)
            }
        }
    }

    /// Fire and forget, no response is tracked for the command
    pub fn notify<T: Command>(&self, cmd: T) -> Result<()> {
        let request = CommandMessage::request_for(&cmd, self.session_id())?;
        self.send_detached(request)
    }

    fn raw_request(&self, method: MethodId, params: serde_json::Value) -> Request {
        let mut request = Request::new(method, params);
        request.session_id = self.session_id.clone();
        request
    }

    fn send_detached(&self, request: Request) -> Result<()> {
        self.send_message(HandlerMessage::Command(CommandMessage::new(
            request,
            Responder::Detached,
        )))
    }

    fn send_message(&self, msg: HandlerMessage) -> Result<()> {
        self.inner
            .sender
            .unbounded_send(msg)
            .map_err(|_| CdpError::ConnectionClosed)
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId::new(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Invoke `listener` for every `<domain>.<event>` event.
    ///
    /// Subscribing does not enable the domain on the remote end.
    pub fn subscribe<F>(
        &self,
        domain: impl Into<String>,
        event: impl Into<String>,
        listener: F,
    ) -> Result<Subscription>
    where
        F: FnMut(&RawEvent) -> Result<()> + Send + 'static,
    {
        let key = EventKey::new(domain.into(), event.into());
        self.subscribe_handler(key, FnHandler(listener))
    }

    /// Registers the handler for all events of `key`
    pub fn subscribe_handler(
        &self,
        key: EventKey,
        handler: impl EventHandler,
    ) -> Result<Subscription> {
        let id = self.next_listener_id();
        self.send_message(HandlerMessage::Subscribe(key, id, Box::new(handler)))?;
        Ok(Subscription {
            id,
            sender: self.inner.sender.clone(),
        })
    }

    /// Returns a stream of the typed events `T`.
    ///
    /// The listener is removed once the stream is dropped.
    pub fn event_listener<T: Event>(&self) -> Result<EventStream<T>> {
        let (tx, rx) = unbounded();
        // the listener lives as long as the stream, not the subscription
        let _subscription = self.subscribe_handler(EventKey::of::<T>(), ChannelHandler::new(tx))?;
        Ok(EventStream::new(rx))
    }

    /// Replaces the transport of the handler.
    ///
    /// Requests still pending on the previous transport fail with
    /// [`CdpError::ConnectionClosed`], listeners stay registered.
    pub fn reconnect(&self, transport: impl Transport) -> Result<()> {
        self.send_message(HandlerMessage::Attach(Box::new(transport)))
    }

    /// Connects to the debugger websocket again
    #[cfg(any(feature = "async-std-runtime", feature = "tokio-runtime"))]
    pub async fn reconnect_ws(&self, debug_ws_url: impl AsRef<str>) -> Result<()> {
        let transport = crate::transport::WsTransport::connect(debug_ws_url).await?;
        self.reconnect(transport)
    }

    /// Shuts the handler down.
    ///
    /// Pending requests fail with [`CdpError::ConnectionClosed`] and all
    /// listeners are removed.
    pub fn close(&self) -> Result<()> {
        self.send_message(HandlerMessage::Close)
    }

    /// Whether the handler is gone
    pub fn is_closed(&self) -> bool {
        self.inner.sender.is_closed()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.inner.stats
    }
}

/// Removes its listener when [`Subscription::unsubscribe`] is called.
///
/// Dropping the subscription keeps the listener registered.
#[derive(Debug)]
#[must_use = "the listener can only be removed through its subscription"]
pub struct Subscription {
    id: ListenerId,
    sender: UnboundedSender<HandlerMessage>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn unsubscribe(self) -> Result<()> {
        self.sender
            .unbounded_send(HandlerMessage::Unsubscribe(self.id))
            .map_err(|_| CdpError::ConnectionClosed)
    }
}
