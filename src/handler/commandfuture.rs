use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::mpsc::UnboundedSender;
use futures::channel::oneshot;
use futures_timer::Delay;
use pin_project_lite::pin_project;

use cdpmux_types::{MethodId, Request, Response};

use crate::cmd::{CommandMessage, Deadline, Responder};
use crate::error::{CdpError, Result};
use crate::handler::HandlerMessage;

/// Turns the raw response into the output of the future
pub(crate) type Converter<R> = fn(Response, MethodId) -> Result<R>;

pin_project! {
    /// Resolves once the response to the command arrived.
    ///
    /// The command is handed to the [`Handler`](crate::Handler) on the first
    /// poll, its deadline starts when the future is created. Dropping the
    /// future abandons the request.
    #[must_use = "futures do nothing unless polled"]
    pub struct CommandFuture<R> {
        #[pin]
        rx_command: oneshot::Receiver<Result<Response>>,
        sender: UnboundedSender<HandlerMessage>,
        message: Option<HandlerMessage>,
        timeout: Option<Duration>,
        delay: Option<Delay>,
        method: MethodId,
        convert: Converter<R>,
    }
}

impl<R> CommandFuture<R> {
    pub(crate) fn new(
        request: Request,
        timeout: Option<Duration>,
        sender: UnboundedSender<HandlerMessage>,
        convert: Converter<R>,
    ) -> Self {
        let (tx, rx_command) = oneshot::channel();
        let method = request.method.clone();
        let deadline = timeout.map(Deadline::after);
        let message = HandlerMessage::Command(CommandMessage::new(
            request,
            Responder::Await { tx, deadline },
        ));
        Self {
            rx_command,
            sender,
            message: Some(message),
            timeout,
            delay: timeout.map(Delay::new),
            method,
            convert,
        }
    }

    /// The identifier of the command
    pub fn method(&self) -> &MethodId {
        &self.method
    }
}

impl<R> Future for CommandFuture<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if let Some(message) = this.message.take() {
            if this.sender.unbounded_send(message).is_err() {
                return Poll::Ready(Err(CdpError::ConnectionClosed));
            }
        }

        match this.rx_command.as_mut().poll(cx) {
            Poll::Ready(Ok(Ok(response))) => {
                Poll::Ready((*this.convert)(response, this.method.clone()))
            }
            Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(err)),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err.into())),
            Poll::Pending => {
                if let Some(delay) = this.delay.as_mut() {
                    if Pin::new(delay).poll(cx).is_ready() {
                        // marks the pending entry as abandoned for the handler
                        this.rx_command.as_mut().get_mut().close();
                        return Poll::Ready(Err(CdpError::Timeout {
                            method: this.method.clone(),
                            timeout: this.timeout.unwrap_or_default(),
                        }));
                    }
                }
                Poll::Pending
            }
        }
    }
}
