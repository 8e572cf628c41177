//! Protocol types shared by the hermod client.
//!
//! This crate holds the I/O-free half of the client: the typed event model
//! and classifier, the per-type content decoders, the error taxonomy, and
//! the timeout backoff policy.

/// Tagged content union and per-variant decoders.
pub mod content;
/// Stable error types and protocol-error extraction.
pub mod error;
/// Typed event union and the raw-payload classifier.
pub mod events;
/// Backoff policy for transient transport failures.
pub mod retry;

pub use content::{decode_content, EventContent, MessageRelation, ReactionRelation};
pub use error::{protocol_error, ClientError, DecodeError, ProtocolError};
pub use events::{classify, EventCore, RoomEventMeta, TypedEvent, UnsignedData};
pub use retry::BackoffPolicy;
