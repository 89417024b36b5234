use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use futures::stream::Stream;
use futures::task::{Context, Poll};
use futures::Sink;

use cdpmux_types::MethodCall;

use crate::error::Result;
use crate::transport::Transport;

/// Exchanges the frames with the transport
#[must_use = "streams do nothing unless polled"]
pub struct Connection {
    /// Queue of serialized commands to send.
    pending_frames: VecDeque<String>,
    /// The transport to the remote endpoint
    transport: Box<dyn Transport>,
    needs_flush: bool,
}

impl Connection {
    pub fn new(transport: impl Transport) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn Transport>) -> Self {
        Self {
            pending_frames: Default::default(),
            transport,
            needs_flush: false,
        }
    }

    /// Queue in the command to send over the transport
    pub fn submit(&mut self, call: &MethodCall) -> Result<()> {
        let frame = serde_json::to_string(call)?;
        tracing::debug!(id = %call.id, method = %call.method, "submit command");
        self.pending_frames.push_back(frame);
        Ok(())
    }

    /// Number of frames not yet handed to the transport
    pub fn queued(&self) -> usize {
        self.pending_frames.len()
    }

    /// Hands queued frames to the sink while it is ready and flushes them
    fn start_send_next(&mut self, cx: &mut Context<'_>) -> Result<()> {
        while !self.pending_frames.is_empty() {
            match Sink::poll_ready(Pin::new(&mut self.transport), cx) {
                Poll::Ready(Ok(())) => {
                    if let Some(frame) = self.pending_frames.pop_front() {
                        tracing::trace!(%frame, "send");
                        Sink::start_send(Pin::new(&mut self.transport), frame)?;
                        self.needs_flush = true;
                    }
                }
                Poll::Ready(Err(err)) => return Err(err),
                Poll::Pending => break,
            }
        }

        if self.needs_flush {
            match Sink::poll_flush(Pin::new(&mut self.transport), cx) {
                Poll::Ready(Ok(())) => self.needs_flush = false,
                Poll::Ready(Err(err)) => return Err(err),
                Poll::Pending => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("pending_frames", &self.pending_frames.len())
            .field("needs_flush", &self.needs_flush)
            .finish_non_exhaustive()
    }
}

impl Stream for Connection {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        // send everything that is queued before reading
        if let Err(err) = pin.start_send_next(cx) {
            return Poll::Ready(Some(Err(err)));
        }

        match Stream::poll_next(Pin::new(&mut pin.transport), cx) {
            Poll::Ready(Some(Ok(frame))) => {
                tracing::trace!(%frame, "read");
                Poll::Ready(Some(Ok(frame)))
            }
            other => other,
        }
    }
}
