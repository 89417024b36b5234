//! A multiplexer for the [Chrome DevTools Protocol](https://chromedevtools.github.io/devtools-protocol/).
//!
//! Many concurrent callers share a single connection: each command gets its
//! own id and the matching response resolves exactly that caller, while
//! events are routed to the listeners registered for their
//! `(domain, event)` key.
//!
//! A [`Session`] is the client handle, the [`Handler`] drives the
//! connection and must be polled, usually from its own task:
//!
//! ```no_run
//! use futures::StreamExt;
//!
//! use cdpmux::cdp::browser_protocol::network::{EventRequestWillBeSent, GetCookiesParams};
//! use cdpmux::{HandlerConfig, Session};
//!
//! # async fn demo() -> cdpmux::Result<()> {
//! let (session, mut handler) =
//!     Session::connect("ws://127.0.0.1:9222/devtools/browser/id", HandlerConfig::default())
//!         .await?;
//! async_std::task::spawn(async move { while handler.next().await.is_some() {} });
//!
//! let mut requests = session.event_listener::<EventRequestWillBeSent>()?;
//! let cookies = session.execute(GetCookiesParams::default()).await?;
//! println!("{:?}", cookies.cookies);
//! while let Some(event) = requests.next().await {
//!     println!("{}", event.request.url);
//! }
//! # Ok(())
//! # }
//! ```

pub use cdpmux_cdp::cdp;
pub use cdpmux_types as types;
pub use cdpmux_types::{CallId, Command, CommandResponse, Domain, DomainEvents, Event, Method};

pub use crate::domain::DomainAdapter;
pub use crate::error::{CdpError, Result};
pub use crate::handler::{
    CommandFuture, Handler, HandlerConfig, HandlerConfigBuilder, EVICTION_INTERVAL,
    REQUEST_TIMEOUT,
};
pub use crate::session::{ResponseMode, Session, Subscription};
pub use crate::stats::{DispatchSnapshot, DispatchStats};
pub use crate::subscribe::{EventHandler, EventKey, EventStream, ListenerId, RawEvent};
pub use crate::transport::{memory, MemoryPeer, MemoryTransport, Transport};

#[cfg(any(feature = "async-std-runtime", feature = "tokio-runtime"))]
pub use crate::transport::WsTransport;

pub(crate) mod cmd;
pub mod conn;
pub(crate) mod correlator;
pub mod domain;
pub mod error;
pub mod handler;
pub mod session;
pub mod stats;
pub mod subscribe;
pub mod transport;
