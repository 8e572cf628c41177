//! Async client for a federated messaging homeserver.
//!
//! The crate is layered bottom-up: [`http`] is the raw transport seam,
//! [`transport`] adds authentication, retry, and rate-limit handling on top
//! of it, [`room`] holds per-room state and message caches, and [`sync`]
//! drives the long-poll loop that feeds everything else.

pub mod http;
pub mod lifecycle;
pub mod room;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use http::{HttpError, HttpResponse, HttpTransport, ReqwestTransport};
pub use lifecycle::{SessionLifecycle, SessionState};
pub use room::{Room, DEFAULT_MESSAGE_CACHE_CAPACITY};
pub use sync::{SyncConfig, SyncEngine};
pub use transport::{Api, ApiConfig, LoginCredentials, PresenceState, Session};
