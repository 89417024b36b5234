use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::{Fuse, Stream, StreamExt};
use futures::task::{Context, Poll};

use crate::cmd::{CommandMessage, Responder};
use crate::conn::Connection;
use crate::correlator::Correlator;
use crate::error::{CdpError, Result};
use crate::handler::job::PeriodicJob;
use crate::stats::DispatchStats;
use crate::subscribe::{EventHandler, EventKey, ListenerId};
use crate::transport::Transport;

pub use commandfuture::CommandFuture;

/// Standard timeout in MS
pub const REQUEST_TIMEOUT: u64 = 30_000;

/// Interval of the sweep over abandoned and timed out requests in MS
pub const EVICTION_INTERVAL: u64 = 1_000;

pub(crate) mod commandfuture;
mod job;

/// Messages the sessions send to the [`Handler`]
pub(crate) enum HandlerMessage {
    Command(CommandMessage),
    Subscribe(EventKey, ListenerId, Box<dyn EventHandler>),
    Unsubscribe(ListenerId),
    /// Replace the transport
    Attach(Box<dyn Transport>),
    Close,
}

impl fmt::Debug for HandlerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerMessage::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            HandlerMessage::Subscribe(key, id, _) => {
                f.debug_tuple("Subscribe").field(key).field(id).finish()
            }
            HandlerMessage::Unsubscribe(id) => f.debug_tuple("Unsubscribe").field(id).finish(),
            HandlerMessage::Attach(_) => f.write_str("Attach"),
            HandlerMessage::Close => f.write_str("Close"),
        }
    }
}

/// The handler that drives the connection, matches responses to their
/// requests and dispatches events to the subscribed listeners.
///
/// The handler must be polled continuously, for example by spawning a task
/// that drains the stream. An `Err` item reports a lost connection, the
/// handler keeps running and accepts a new transport via
/// [`Session::reconnect`](crate::Session::reconnect). The stream ends once
/// the session is closed or all session handles are dropped.
#[must_use = "streams do nothing unless polled"]
#[derive(Debug)]
pub struct Handler {
    /// Messages from all the session handles
    from_sessions: Fuse<UnboundedReceiver<HandlerMessage>>,
    /// The connection to the remote endpoint, `None` while disconnected
    conn: Option<Connection>,
    correlator: Correlator,
    /// Evicts timed out and abandoned requests periodically
    evict_command_timeout: PeriodicJob,
    closed: bool,
}

impl Handler {
    pub(crate) fn new(
        conn: Connection,
        rx: UnboundedReceiver<HandlerMessage>,
        stats: Arc<DispatchStats>,
        config: &HandlerConfig,
    ) -> Self {
        Self {
            from_sessions: rx.fuse(),
            conn: Some(conn),
            correlator: Correlator::new(stats),
            evict_command_timeout: PeriodicJob::new(config.eviction_interval),
            closed: false,
        }
    }

    /// Whether a transport is currently attached
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Number of requests waiting for their response
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_len()
    }

    /// Number of registered event listeners
    pub fn listeners(&self) -> usize {
        self.correlator.subscriber_len()
    }

    fn submit_command(&mut self, msg: CommandMessage) {
        let Some(conn) = self.conn.as_mut() else {
            msg.fail(CdpError::ConnectionClosed);
            return;
        };
        let CommandMessage { request, responder } = msg;
        let sender = match responder {
            Responder::Await { tx, deadline } => Some((tx, deadline)),
            Responder::Detached => None,
        };
        let call = self.correlator.submit(request, sender);
        if let Err(err) = conn.submit(&call) {
            tracing::warn!(id = %call.id, method = %call.method, %err, "failed to submit command");
            self.correlator.fail(call.id, err);
        }
    }

    fn attach(&mut self, transport: Box<dyn Transport>) {
        if self.conn.is_some() {
            // responses to these can never arrive over the new transport
            self.correlator.fail_all();
        }
        tracing::debug!(listeners = self.correlator.subscriber_len(), "attach transport");
        self.conn = Some(Connection::from_boxed(transport));
    }

    /// The transport is gone, listeners stay registered for a reconnect
    fn disconnect(&mut self) {
        tracing::debug!(
            pending = self.correlator.pending_len(),
            "connection lost"
        );
        self.conn = None;
        self.correlator.fail_all();
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            pending = self.correlator.pending_len(),
            listeners = self.correlator.subscriber_len(),
            "shutting down"
        );
        self.closed = true;
        self.conn = None;
        self.correlator.fail_all();
        self.correlator.clear_subscribers();
    }
}

impl Stream for Handler {
    type Item = Result<()>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();
        if pin.closed {
            return Poll::Ready(None);
        }

        loop {
            let now = Instant::now();

            // all session messages before the connection, so frames go out in
            // the order the commands were issued
            while let Poll::Ready(msg) = Pin::new(&mut pin.from_sessions).poll_next(cx) {
                match msg {
                    Some(HandlerMessage::Command(cmd)) => pin.submit_command(cmd),
                    Some(HandlerMessage::Subscribe(key, id, handler)) => {
                        pin.correlator.subscribe(key, id, handler)
                    }
                    Some(HandlerMessage::Unsubscribe(id)) => {
                        pin.correlator.unsubscribe(id);
                    }
                    Some(HandlerMessage::Attach(transport)) => pin.attach(transport),
                    Some(HandlerMessage::Close) | None => {
                        pin.shutdown();
                        return Poll::Ready(None);
                    }
                }
            }

            let mut done = true;
            let mut lost = None;

            if let Some(conn) = pin.conn.as_mut() {
                loop {
                    match Pin::new(&mut *conn).poll_next(cx) {
                        Poll::Ready(Some(Ok(frame))) => {
                            pin.correlator.dispatch(&frame, now);
                            done = false;
                        }
                        Poll::Ready(Some(Err(err))) => {
                            lost = Some(err);
                            break;
                        }
                        Poll::Ready(None) => {
                            lost = Some(CdpError::ConnectionClosed);
                            break;
                        }
                        Poll::Pending => break,
                    }
                }
            }

            if let Some(err) = lost {
                pin.disconnect();
                return Poll::Ready(Some(Err(err)));
            }

            if pin.evict_command_timeout.poll_ready(cx) {
                pin.correlator.evict_expired(now);
            }

            if done {
                // no frames were read from the transport
                return Poll::Pending;
            }
        }
    }
}

/// Settings of the [`Handler`] and its sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Deadline applied to commands that do not specify their own
    pub request_timeout: Option<Duration>,
    /// How often abandoned and timed out requests are evicted
    pub eviction_interval: Duration,
}

impl HandlerConfig {
    pub fn builder() -> HandlerConfigBuilder {
        HandlerConfigBuilder::default()
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_millis(REQUEST_TIMEOUT)),
            eviction_interval: Duration::from_millis(EVICTION_INTERVAL),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandlerConfigBuilder {
    request_timeout: Option<Duration>,
    eviction_interval: Duration,
}

impl Default for HandlerConfigBuilder {
    fn default() -> Self {
        let config = HandlerConfig::default();
        Self {
            request_timeout: config.request_timeout,
            eviction_interval: config.eviction_interval,
        }
    }
}

impl HandlerConfigBuilder {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Commands without an explicit timeout wait until their response
    /// arrives or the connection is lost
    pub fn no_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn build(self) -> std::result::Result<HandlerConfig, String> {
        if self.eviction_interval.is_zero() {
            return Err("eviction interval must not be zero".to_string());
        }
        if self.request_timeout.map_or(false, |t| t.is_zero()) {
            return Err("request timeout must not be zero".to_string());
        }
        Ok(HandlerConfig {
            request_timeout: self.request_timeout,
            eviction_interval: self.eviction_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_config() {
        let config = HandlerConfig::builder().build().unwrap();
        assert_eq!(config, HandlerConfig::default());
        assert_eq!(
            config.request_timeout,
            Some(Duration::from_millis(REQUEST_TIMEOUT))
        );

        let config = HandlerConfig::builder()
            .no_request_timeout()
            .eviction_interval(Duration::from_millis(10))
            .build()
            .unwrap();
        assert!(config.request_timeout.is_none());
        assert_eq!(config.eviction_interval, Duration::from_millis(10));

        assert!(HandlerConfig::builder()
            .eviction_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(HandlerConfig::builder()
            .request_timeout(Duration::ZERO)
            .build()
            .is_err());
    }
}
