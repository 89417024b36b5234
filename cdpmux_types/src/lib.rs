use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The whole identifier of a method or event like `Network.enable`
pub type MethodId = Cow<'static, str>;

/// A Message sent by the client
#[derive(Serialize, Debug, PartialEq, Clone)]
pub struct MethodCall {
    /// Identifier for this method call
    ///
    /// [`MethodCall`] id's must be unique for every session
    pub id: CallId,
    pub method: MethodId,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub params: serde_json::Value,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(usize);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

impl CallId {
    pub fn new(id: usize) -> Self {
        CallId(id)
    }

    pub fn value(&self) -> usize {
        self.0
    }
}

pub trait Method {
    /// The whole string identifier for this method like: `DOM.removeNode`
    fn identifier(&self) -> MethodId;

    /// The name of the domain this method belongs to: `DOM`
    fn domain_name(&self) -> MethodId {
        self.split().0
    }

    /// The standalone identifier of the method inside the domain: `removeNode`
    fn method_name(&self) -> MethodId {
        self.split().1
    }

    /// Tuple of (`domain_name`, `method_name`) : (`DOM`, `removeNode`)
    fn split(&self) -> (MethodId, MethodId) {
        match self.identifier() {
            Cow::Borrowed(id) => {
                let (domain, name) = split_identifier(id);
                (domain.into(), name.into())
            }
            Cow::Owned(id) => {
                let (domain, name) = split_identifier(&id);
                (Cow::Owned(domain.into()), Cow::Owned(name.into()))
            }
        }
    }
}

/// Splits `Domain.name` at the first `.`, an identifier without a domain
/// qualifier yields an empty method name.
pub fn split_identifier(id: &str) -> (&str, &str) {
    id.split_once('.').unwrap_or((id, ""))
}

/// A [`Method`] whose identifier is known without an instance.
pub trait MethodType {
    fn method_id() -> MethodId
    where
        Self: Sized;
}

/// A remote command and the type its response deserializes into.
pub trait Command: Serialize + Method {
    type Response: DeserializeOwned + fmt::Debug;
}

/// A typed event payload.
pub trait Event: MethodType + DeserializeOwned + fmt::Debug + Send + Sync + 'static {}

/// A protocol domain like `Network`.
pub trait Domain: Send + Sync + 'static {
    /// Name of the domain as used in method identifiers
    const NAME: &'static str;

    /// Identifiers of all events the domain can emit
    const EVENTS: &'static [&'static str];

    /// The sum type over all events of this domain
    type Event: DomainEvents;
}

/// A [`Command`] that belongs to the domain `Self::Domain`.
pub trait DomainCommand: Command {
    type Domain: Domain;
}

/// The sum of all event payloads of a domain.
pub trait DomainEvents: Sized + fmt::Debug + Clone + Send + Sync + 'static {
    /// Deserializes the `params` of the event `method`.
    ///
    /// Returns `Ok(None)` if the `method` is not an event of this domain.
    fn from_method(method: &str, params: serde_json::Value) -> serde_json::Result<Option<Self>>;

    /// The identifier of the wrapped event
    fn identifier(&self) -> MethodId;

    /// The wrapped event payload, used to downcast to a concrete event type
    fn payload(&self) -> &dyn Any;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse<T>
where
    T: fmt::Debug,
{
    pub id: CallId,
    pub result: T,
    pub method: MethodId,
}

pub type CommandResult<T> = Result<CommandResponse<T>, Error>;

impl<T: fmt::Debug> Deref for CommandResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.result
    }
}

/// An event as received on the wire, with its params still in json.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct CdpJsonEventMessage {
    /// Name of the method
    pub method: MethodId,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Json params
    #[serde(default)]
    pub params: serde_json::Value,
}

impl CdpJsonEventMessage {
    /// Deserializes the `params` into `T`, a missing `params` object is
    /// treated as `{}`.
    pub fn params_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.params.is_null() {
            serde_json::from_value(serde_json::Value::Object(Default::default()))
        } else {
            T::deserialize(&self.params)
        }
    }
}

impl Method for CdpJsonEventMessage {
    fn identifier(&self) -> MethodId {
        self.method.clone()
    }
}

/// A command that was already lowered to json
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Request {
    pub method: MethodId,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: MethodId, params: serde_json::Value) -> Self {
        Self {
            method,
            params,
            session_id: None,
        }
    }

    pub fn with_session(
        method: MethodId,
        params: serde_json::Value,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            method,
            params,
            session_id: Some(session_id.into()),
        }
    }

    /// Lowers a typed command
    pub fn from_command<T: Command>(cmd: &T) -> serde_json::Result<Self> {
        Ok(Self::new(cmd.identifier(), serde_json::to_value(cmd)?))
    }

    pub fn into_call(self, id: CallId) -> MethodCall {
        MethodCall {
            id,
            method: self.method,
            session_id: self.session_id,
            params: self.params,
        }
    }
}

impl Method for Request {
    fn identifier(&self) -> MethodId {
        self.method.clone()
    }
}

/// A response to a [`MethodCall`] from the remote endpoint
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Response {
    /// Numeric identifier for the exact request
    pub id: CallId,
    /// The response payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The Reason why the [`MethodCall`] failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

/// An inbound frame
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
#[allow(clippy::large_enum_variant)]
pub enum Message<T = CdpJsonEventMessage> {
    Response(Response),
    Event(T),
}

/// The error object of a failed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    /// Error code
    #[serde(default)]
    pub code: i64,
    /// Error Message
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code, self.message)?;
        if let Some(data) = self.data.as_ref() {
            write!(f, " ({})", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Represents a binary type as defined in CDP
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Binary(String);

impl AsRef<str> for Binary {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl From<Binary> for String {
    fn from(b: Binary) -> String {
        b.0
    }
}

impl From<String> for Binary {
    fn from(expr: String) -> Self {
        Self(expr)
    }
}
