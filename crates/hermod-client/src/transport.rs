use std::time::Duration;

use hermod_core::{BackoffPolicy, ClientError};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::http::{HttpError, HttpResponse, HttpTransport};

const CLIENT_API_PREFIX: &str = "/_matrix/client/r0";

/// Presence preference advertised with each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceState {
    #[default]
    Online,
    Offline,
    Unavailable,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Offline => "offline",
            PresenceState::Unavailable => "unavailable",
        }
    }
}

/// Credentials exchanged for a session.
#[derive(Debug, Clone)]
pub enum LoginCredentials {
    /// User identifier plus password (`m.login.password`).
    Password { user_id: String, password: String },
    /// Pre-issued bearer token (`m.login.token`).
    Token(String),
}

/// Session credential captured from a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
}

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Maximum attempts before a transient failure surfaces as exhaustion.
    pub max_retry: u32,
    /// Backoff policy for consecutive timeouts.
    pub backoff: BackoffPolicy,
    /// Device id sent with login, when set.
    pub device_id: Option<String>,
    /// Device display name sent with login, when set.
    pub device_name: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_retry: 10,
            backoff: BackoffPolicy::default(),
            device_id: None,
            device_name: None,
        }
    }
}

/// Authenticated request issuer with retry and rate-limit handling.
///
/// Holds the session credential and no protocol knowledge beyond the
/// endpoint paths it is asked to hit.
#[derive(Debug)]
pub struct Api<T: HttpTransport> {
    http: T,
    base_url: Url,
    config: ApiConfig,
    session: Option<Session>,
}

impl<T: HttpTransport> Api<T> {
    pub fn new(http: T, homeserver: &str, config: ApiConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(homeserver)
            .map_err(|_| ClientError::InvalidHomeserver(homeserver.to_owned()))?;
        Ok(Self {
            http,
            base_url,
            config,
            session: None,
        })
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Adopt a previously captured session credential.
    pub fn restore_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Build a client-API URL for `endpoint` with optional query pairs.
    pub fn build_url(&self, endpoint: &str, query: &[(&str, String)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&format!("{CLIENT_API_PREFIX}/{endpoint}"));
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Issue one authenticated request, retrying transient failures.
    ///
    /// Rate-limit directives are honored verbatim and never count against
    /// the retry budget. A binary response short-circuits the loop.
    pub async fn send(
        &self,
        method: &str,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<HttpResponse, ClientError> {
        let session = self.session.as_ref().ok_or(ClientError::NotLoggedIn)?;
        let token = session.access_token.as_str();

        let mut timeouts: u32 = 0;
        loop {
            match self.http.request(method, url.as_str(), body, Some(token)).await {
                Ok(HttpResponse::Binary(bytes)) => return Ok(HttpResponse::Binary(bytes)),
                Ok(HttpResponse::Json(value)) => {
                    if let Some(wait_ms) = rate_limit_hint(&value) {
                        debug!(wait_ms, path = url.path(), "rate limited, honoring server wait");
                        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                        continue;
                    }
                    return Ok(HttpResponse::Json(value));
                }
                Err(HttpError::Transient(detail)) => {
                    timeouts += 1;
                    if timeouts >= self.config.max_retry.max(1) {
                        return Err(ClientError::RetriesExhausted {
                            method: method.to_owned(),
                            path: url.path().to_owned(),
                            payload: body.map(Value::to_string).unwrap_or_default(),
                        });
                    }
                    let wait = self.config.backoff.wait_for_timeout(timeouts);
                    warn!(
                        timeouts,
                        wait_ms = wait.as_millis() as u64,
                        path = url.path(),
                        detail,
                        "transient transport failure, backing off"
                    );
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(HttpError::Fatal(detail)) => return Err(ClientError::Http(detail)),
            }
        }
    }

    async fn send_json(
        &self,
        method: &str,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        match self.send(method, url, body).await? {
            HttpResponse::Json(value) => Ok(value),
            HttpResponse::Binary(_) => Err(ClientError::UnexpectedBinary),
        }
    }

    /// Exchange credentials for a session.
    ///
    /// The response is returned as-is so callers can check for an in-band
    /// protocol error code; the session credential is captured only when
    /// the server issued one.
    pub async fn login(&mut self, credentials: &LoginCredentials) -> Result<Value, ClientError> {
        let mut body = match credentials {
            LoginCredentials::Password { user_id, password } => json!({
                "type": "m.login.password",
                "identifier": {"user": user_id, "type": "m.id.user"},
                "password": password,
            }),
            LoginCredentials::Token(token) => json!({
                "type": "m.login.token",
                "token": token,
            }),
        };
        if let Some(device_id) = &self.config.device_id {
            body["device_id"] = Value::String(device_id.clone());
        }
        if let Some(device_name) = &self.config.device_name {
            body["device_name"] = Value::String(device_name.clone());
        }

        let url = self.build_url("login", &[]);
        // Login runs outside the authenticated retry loop; there is no
        // credential to attach yet.
        let response = self
            .http
            .request("POST", url.as_str(), Some(&body), None)
            .await
            .map_err(|err| ClientError::Http(err.to_string()))?;

        let value = match response {
            HttpResponse::Json(value) => value,
            HttpResponse::Binary(_) => return Err(ClientError::UnexpectedBinary),
        };

        if let Some(access_token) = value.get("access_token").and_then(Value::as_str) {
            self.session = Some(Session {
                access_token: access_token.to_owned(),
                device_id: value
                    .get("device_id")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                user_id: value
                    .get("user_id")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
            });
        }

        Ok(value)
    }

    /// Invalidate the current session credential.
    pub async fn logout(&mut self) -> Result<(), ClientError> {
        let url = self.build_url("logout", &[]);
        self.send_json("POST", &url, None).await?;
        self.session = None;
        Ok(())
    }

    /// Invalidate every session credential issued to this user.
    pub async fn logout_all(&mut self) -> Result<(), ClientError> {
        let url = self.build_url("logout/all", &[]);
        self.send_json("POST", &url, None).await?;
        self.session = None;
        Ok(())
    }

    /// Send an event to a room id or alias.
    ///
    /// Aliases are resolved through the directory first; an alias the
    /// directory cannot resolve fails without attempting the send.
    pub async fn room_send(
        &self,
        target: &str,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, ClientError> {
        let room_id = if target.starts_with('!') && target.contains(':') {
            target.to_owned()
        } else if target.starts_with('#') && target.contains(':') {
            let url = self.build_url(&format!("directory/room/{target}"), &[]);
            let response = self.send_json("GET", &url, None).await?;
            match response.get("room_id").and_then(Value::as_str) {
                Some(room_id) => room_id.to_owned(),
                None => return Err(ClientError::UnresolvedAlias(target.to_owned())),
            }
        } else {
            return Err(ClientError::InvalidRoomTarget(target.to_owned()));
        };

        let txn_id = Uuid::new_v4();
        let url = self.build_url(&format!("rooms/{room_id}/send/{event_type}/{txn_id}"), &[]);
        self.send_json("PUT", &url, Some(content)).await
    }

    /// Long-poll for state since the given cursor.
    pub async fn get_sync(
        &self,
        filter: Option<&str>,
        since: Option<&str>,
        full_state: bool,
        set_presence: PresenceState,
        timeout_ms: u64,
    ) -> Result<Value, ClientError> {
        let mut query = vec![
            ("full_state", full_state.to_string()),
            ("set_presence", set_presence.as_str().to_owned()),
            ("timeout", timeout_ms.to_string()),
        ];
        if let Some(filter) = filter {
            query.push(("filter", filter.to_owned()));
        }
        if let Some(since) = since {
            query.push(("since", since.to_owned()));
        }

        let url = self.build_url("sync", &query);
        self.send_json("GET", &url, None).await
    }

    /// Fetch the full current state of a room.
    pub async fn get_room_state(&self, room_id: &str) -> Result<Value, ClientError> {
        let url = self.build_url(&format!("rooms/{room_id}/state"), &[]);
        self.send_json("GET", &url, None).await
    }

    /// List rooms this session has joined.
    pub async fn joined_rooms(&self) -> Result<Vec<String>, ClientError> {
        let url = self.build_url("joined_rooms", &[]);
        let response = self.send_json("GET", &url, None).await?;
        Ok(response
            .get("joined_rooms")
            .and_then(Value::as_array)
            .map(|rooms| {
                rooms
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn rate_limit_hint(body: &Value) -> Option<u64> {
    body.get("retry_after_ms").and_then(Value::as_u64)
}
