//! The frame level boundary to the remote endpoint.
//!
//! A [`Transport`] is anything that yields inbound text frames and accepts
//! outbound text frames. [`WsTransport`] speaks to a browser over a
//! websocket, [`memory`] creates an in-process pipe.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{ready, Sink, Stream, StreamExt};

use crate::error::{CdpError, Result};

/// A bidirectional stream of text frames.
pub trait Transport:
    Stream<Item = Result<String>> + Sink<String, Error = CdpError> + Send + Unpin + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<String>> + Sink<String, Error = CdpError> + Send + Unpin + 'static
{
}

#[cfg(any(feature = "async-std-runtime", feature = "tokio-runtime"))]
pub use ws::WsTransport;

#[cfg(any(feature = "async-std-runtime", feature = "tokio-runtime"))]
mod ws {
    use super::*;

    use async_tungstenite::tungstenite::Message as WsMessage;
    use async_tungstenite::WebSocketStream;

    cfg_if::cfg_if! {
        if #[cfg(feature = "async-std-runtime")] {
            use async_tungstenite::async_std::{connect_async, ConnectStream};
        } else if #[cfg(feature = "tokio-runtime")] {
            use async_tungstenite::tokio::{connect_async, ConnectStream};
        }
    }

    /// Text frames over a websocket connection
    #[must_use = "streams do nothing unless polled"]
    pub struct WsTransport {
        ws: WebSocketStream<ConnectStream>,
    }

    impl WsTransport {
        /// Connects to the debugger websocket, like
        /// `ws://127.0.0.1:9222/devtools/browser/<id>`
        pub async fn connect(debug_ws_url: impl AsRef<str>) -> Result<Self> {
            let (ws, _) = connect_async(debug_ws_url.as_ref()).await?;
            Ok(Self { ws })
        }
    }

    impl std::fmt::Debug for WsTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("WsTransport").finish_non_exhaustive()
        }
    }

    impl Stream for WsTransport {
        type Item = Result<String>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let pin = self.get_mut();
            loop {
                match ready!(pin.ws.poll_next_unpin(cx)) {
                    Some(Ok(WsMessage::Text(text))) => return Poll::Ready(Some(Ok(text))),
                    Some(Ok(WsMessage::Binary(data))) => {
                        // invalid utf-8 ends up as a malformed frame
                        return Poll::Ready(Some(Ok(String::from_utf8_lossy(&data).into_owned())));
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::debug!(?frame, "websocket closed by remote");
                        return Poll::Ready(None);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                    None => return Poll::Ready(None),
                }
            }
        }
    }

    impl Sink<String> for WsTransport {
        type Error = CdpError;

        fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
            Sink::poll_ready(Pin::new(&mut self.get_mut().ws), cx).map_err(Into::into)
        }

        fn start_send(self: Pin<&mut Self>, item: String) -> Result<()> {
            Sink::start_send(Pin::new(&mut self.get_mut().ws), WsMessage::Text(item))
                .map_err(Into::into)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
            Sink::poll_flush(Pin::new(&mut self.get_mut().ws), cx).map_err(Into::into)
        }

        fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
            Sink::poll_close(Pin::new(&mut self.get_mut().ws), cx).map_err(Into::into)
        }
    }
}

/// Creates a connected in-process pair: the [`MemoryTransport`] goes to the
/// session, the [`MemoryPeer`] plays the remote endpoint.
pub fn memory() -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_client) = unbounded();
    let (to_client, from_peer) = unbounded();
    (
        MemoryTransport {
            incoming: from_peer,
            outgoing: to_peer,
        },
        MemoryPeer {
            incoming: from_client,
            outgoing: to_client,
        },
    )
}

/// The session side of an in-process pipe.
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct MemoryTransport {
    incoming: UnboundedReceiver<String>,
    outgoing: UnboundedSender<String>,
}

impl Stream for MemoryTransport {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().incoming.poll_next_unpin(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<String> for MemoryTransport {
    type Error = CdpError;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
        if self.outgoing.is_closed() {
            Poll::Ready(Err(CdpError::ConnectionClosed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<()> {
        self.outgoing
            .unbounded_send(item)
            .map_err(|_| CdpError::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
        self.outgoing.close_channel();
        Poll::Ready(Ok(()))
    }
}

/// The remote side of an in-process pipe.
#[derive(Debug)]
pub struct MemoryPeer {
    incoming: UnboundedReceiver<String>,
    outgoing: UnboundedSender<String>,
}

impl MemoryPeer {
    /// The next frame written by the session, `None` once the session side
    /// is gone.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.incoming.next().await
    }

    /// Like [`MemoryPeer::next_frame`] but parses the frame as json.
    pub async fn next_json(&mut self) -> Option<Result<serde_json::Value>> {
        let frame = self.next_frame().await?;
        Some(serde_json::from_str(&frame).map_err(Into::into))
    }

    /// Delivers a frame to the session.
    pub fn push(&self, frame: impl Into<String>) -> Result<()> {
        self.outgoing
            .unbounded_send(frame.into())
            .map_err(|_| CdpError::ConnectionClosed)
    }

    /// Closes the pipe, the session side observes the end of its stream.
    pub fn close(&self) {
        self.outgoing.close_channel();
    }
}
