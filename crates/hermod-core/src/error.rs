use serde_json::Value;
use thiserror::Error;

/// Structured error code carried in a response body (`errcode`/`error`).
///
/// Protocol errors are never retried automatically; callers must check for
/// them explicitly and decide whether the session can continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server returned {errcode}: {}", error.as_deref().unwrap_or("unknown error"))]
pub struct ProtocolError {
    /// Stable machine-readable error code, for example `M_FORBIDDEN`.
    pub errcode: String,
    /// Human-readable message supplied by the server.
    pub error: Option<String>,
}

/// Extract a protocol error from a response body, if one is present.
pub fn protocol_error(body: &Value) -> Option<ProtocolError> {
    let errcode = body.get("errcode").and_then(Value::as_str)?;
    Some(ProtocolError {
        errcode: errcode.to_owned(),
        error: body
            .get("error")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
    })
}

/// Errors that can occur while decoding raw event payloads.
///
/// Decoding fails closed: an unrecognized or malformed shape produces an
/// error for that single event instead of a silently coerced value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The event type string has no known content shape.
    #[error("event type '{0}' has no known content shape")]
    UnknownType(String),
    /// The message subtype (`msgtype`) has no known content shape.
    #[error("message subtype '{0}' has no known content shape")]
    UnknownMessageType(String),
    /// A required field is absent from the raw payload.
    #[error("event is missing required field '{0}'")]
    MissingField(&'static str),
    /// The content blob did not match the shape expected for its type.
    #[error("malformed '{event_type}' content: {detail}")]
    MalformedContent {
        /// Protocol type string of the offending event.
        event_type: String,
        /// Deserialization failure detail.
        detail: String,
    },
}

/// Client-facing error type shared by the transport and the sync engine.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An authenticated call was issued without a session credential.
    ///
    /// This is a programming-contract violation, not a retryable condition.
    #[error("client is not logged in")]
    NotLoggedIn,
    /// The transient-failure retry budget was exhausted for one request.
    #[error("max retries reached for {method} {path} | {payload}")]
    RetriesExhausted {
        /// HTTP method of the failing request.
        method: String,
        /// Request path, for diagnostics.
        path: String,
        /// Serialized request payload, empty when the request had no body.
        payload: String,
    },
    /// The server answered with a structured protocol error code.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The send target is neither a room id (`!...`) nor an alias (`#...`).
    #[error("'{0}' is not a valid room id or alias")]
    InvalidRoomTarget(String),
    /// A directory lookup for the alias returned no room id.
    #[error("alias '{0}' did not resolve to a room id")]
    UnresolvedAlias(String),
    /// The configured homeserver base URL could not be parsed.
    #[error("invalid homeserver URL '{0}'")]
    InvalidHomeserver(String),
    /// An operation was attempted in a session state that forbids it.
    #[error("cannot run '{action}' in session state '{state}'")]
    InvalidTransition {
        /// Current session state name.
        state: &'static str,
        /// Rejected operation name.
        action: &'static str,
    },
    /// Non-retryable transport failure.
    #[error("transport failure: {0}")]
    Http(String),
    /// A JSON body was expected but the server returned raw bytes.
    #[error("unexpected binary response body")]
    UnexpectedBinary,
    /// A raw event payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
