use std::time::{Duration, Instant};

use futures::channel::oneshot::Sender as OneshotSender;
use serde::de::DeserializeOwned;

use cdpmux_types::{Command, CommandResponse, MethodId, Request, Response};

use crate::error::{CdpError, Result};

/// The point in time after which a caller stops waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deadline {
    pub at: Instant,
    pub timeout: Duration,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.at <= now
    }
}

/// How the handler treats the response of a submitted command
#[derive(Debug)]
pub(crate) enum Responder {
    /// A caller waits for the response
    Await {
        tx: OneshotSender<Result<Response>>,
        deadline: Option<Deadline>,
    },
    /// Fire and forget, no pending request is registered
    Detached,
}

/// A command on its way to the handler
#[derive(Debug)]
pub(crate) struct CommandMessage {
    pub request: Request,
    pub responder: Responder,
}

impl CommandMessage {
    pub fn new(request: Request, responder: Responder) -> Self {
        Self { request, responder }
    }

    /// Lowers a typed command, scoped to the target session if set
    pub fn request_for<T: Command>(cmd: &T, session_id: Option<&str>) -> Result<Request> {
        let mut request = Request::from_command(cmd)?;
        request.session_id = session_id.map(str::to_string);
        Ok(request)
    }

    /// Rejects the command without sending it
    pub fn fail(self, err: CdpError) {
        if let Responder::Await { tx, .. } = self.responder {
            let _ = tx.send(Err(err));
        } else {
            tracing::debug!(method = %self.request.method, %err, "dropping detached command");
        }
    }
}

/// Converts a raw response into the result of `T`
pub(crate) fn to_command_response<T: Command>(
    resp: Response,
    method: MethodId,
) -> Result<CommandResponse<T::Response>> {
    let id = resp.id;
    let result = to_result::<T::Response>(resp)?;
    Ok(CommandResponse { id, result, method })
}

/// Extracts the `result` of a response, a remote error object becomes
/// [`CdpError::Chrome`]
pub(crate) fn to_result<T: DeserializeOwned>(resp: Response) -> Result<T> {
    if let Some(res) = resp.result {
        Ok(serde_json::from_value(res)?)
    } else if let Some(err) = resp.error {
        Err(err.into())
    } else {
        Err(CdpError::NoResponse)
    }
}
