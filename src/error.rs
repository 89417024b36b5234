use std::io;
use std::time::Duration;

use async_tungstenite::tungstenite;
use futures::channel::oneshot::Canceled;
use thiserror::Error;

use cdpmux_types::MethodId;

pub type Result<T, E = CdpError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CdpError {
    #[error("{0}")]
    Ws(#[from] tungstenite::Error),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// The remote endpoint answered with an error object
    #[error("{0}")]
    Chrome(#[from] cdpmux_types::Error),
    #[error("Received no response from the remote endpoint.")]
    NoResponse,
    #[error("The connection to the remote endpoint is closed")]
    ConnectionClosed,
    #[error("Request `{method}` timed out after {timeout:?}")]
    Timeout { method: MethodId, timeout: Duration },
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    #[error("Event listener panicked: {0}")]
    ListenerPanicked(String),
    #[error("{0}")]
    Msg(String),
}

impl CdpError {
    pub fn msg(msg: impl Into<String>) -> Self {
        CdpError::Msg(msg.into())
    }

    /// Whether this error was caused by the connection going away
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, CdpError::ConnectionClosed)
    }
}

impl From<Canceled> for CdpError {
    fn from(_: Canceled) -> Self {
        CdpError::ConnectionClosed
    }
}
