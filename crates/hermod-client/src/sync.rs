use std::{collections::HashMap, future::Future, pin::Pin, time::Duration};

use hermod_core::{classify, protocol_error, ClientError, DecodeError, TypedEvent};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    http::HttpTransport,
    lifecycle::{SessionLifecycle, SessionState},
    room::{Room, DEFAULT_MESSAGE_CACHE_CAPACITY},
    transport::{Api, LoginCredentials, PresenceState, Session},
};

/// Poll-loop tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Long-poll timeout sent with each sync request.
    pub timeout_ms: u64,
    /// Presence preference advertised with each poll.
    pub set_presence: PresenceState,
    /// Optional server-side filter identifier.
    pub filter: Option<String>,
    /// Request full state on every poll (the initial poll is always full
    /// state because it carries no cursor).
    pub full_state: bool,
    /// Optional delay between consecutive polls.
    pub poll_delay: Option<Duration>,
    /// Bound for each room's recent-message cache.
    pub message_cache_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            set_presence: PresenceState::default(),
            filter: None,
            full_state: false,
            poll_delay: None,
            message_cache_capacity: DEFAULT_MESSAGE_CACHE_CAPACITY,
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type EventHandler = Box<dyn Fn(TypedEvent) -> HandlerFuture + Send + Sync>;

/// Owns the cursor, drives the poll loop, and fans deltas out to the
/// per-category processors and registered handlers.
///
/// One engine per connected session. The engine processes one batch at a
/// time: the next poll is never issued before the current batch's state
/// mutations and handler dispatches complete.
pub struct SyncEngine<T: HttpTransport> {
    api: Api<T>,
    config: SyncConfig,
    lifecycle: SessionLifecycle,
    since: Option<String>,
    rooms: HashMap<String, Room>,
    handlers: HashMap<String, EventHandler>,
    cancel: CancellationToken,
}

impl<T: HttpTransport> SyncEngine<T> {
    pub fn new(api: Api<T>, config: SyncConfig) -> Self {
        Self {
            api,
            config,
            lifecycle: SessionLifecycle::default(),
            since: None,
            rooms: HashMap::new(),
            handlers: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Current sync cursor; `None` before the first completed poll.
    pub fn cursor(&self) -> Option<&str> {
        self.since.as_deref()
    }

    pub fn api(&self) -> &Api<T> {
        &self.api
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn rooms(&self) -> &HashMap<String, Room> {
        &self.rooms
    }

    /// Token observed at the top of each poll cycle; cancelling it stops
    /// the loop and abandons any in-flight poll.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register the handler for an event type.
    ///
    /// At most one handler per type; registering again replaces the
    /// previous one. Types without a handler are no-ops.
    pub fn register_handler<F, Fut>(&mut self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(TypedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .insert(event_type.into(), Box::new(move |event| Box::pin(handler(event))));
    }

    /// Exchange credentials for a session and arm the poll loop.
    pub async fn login(&mut self, credentials: &LoginCredentials) -> Result<(), ClientError> {
        self.lifecycle.begin_login()?;

        let response = match self.api.login(credentials).await {
            Ok(response) => response,
            Err(err) => {
                let _ = self.lifecycle.on_login_result(false);
                return Err(err);
            }
        };

        if let Some(err) = protocol_error(&response) {
            let _ = self.lifecycle.on_login_result(false);
            return Err(ClientError::Protocol(err));
        }
        if !self.api.is_logged_in() {
            let _ = self.lifecycle.on_login_result(false);
            return Err(ClientError::Http(
                "login response carried no access token".to_owned(),
            ));
        }

        self.lifecycle.on_login_result(true)?;
        // Cursor unset: the next poll is a full initial sync.
        self.since = None;
        info!(
            user_id = self
                .api
                .session()
                .and_then(|session| session.user_id.as_deref()),
            "login complete, sync armed"
        );
        Ok(())
    }

    /// Adopt a previously captured session credential and arm the loop.
    pub fn restore_session(&mut self, session: Session) -> Result<(), ClientError> {
        self.lifecycle.begin_login()?;
        self.api.restore_session(session);
        self.lifecycle.on_login_result(true)?;
        self.since = None;
        Ok(())
    }

    /// Drive the poll loop until cancelled or a fatal error occurs.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        self.lifecycle.require_polling("run")?;
        let cancel = self.cancel.clone();

        loop {
            if cancel.is_cancelled() {
                self.lifecycle.stop();
                return Ok(());
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    // The in-flight poll is abandoned; nothing from it was
                    // applied, so the cursor still points at the last fully
                    // processed batch.
                    self.lifecycle.stop();
                    return Ok(());
                }
                outcome = self.sync_once() => outcome,
            };

            if let Err(err) = outcome {
                warn!(error = %err, "sync loop halted");
                self.lifecycle.fault();
                return Err(err);
            }

            if let Some(delay) = self.config.poll_delay {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.lifecycle.stop();
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Issue one poll and apply the returned delta.
    ///
    /// The cursor advances only after the whole batch has been processed.
    pub async fn sync_once(&mut self) -> Result<(), ClientError> {
        self.lifecycle.require_polling("sync")?;

        let response = self
            .api
            .get_sync(
                self.config.filter.as_deref(),
                self.since.as_deref(),
                self.config.full_state,
                self.config.set_presence,
                self.config.timeout_ms,
            )
            .await?;

        if let Some(err) = protocol_error(&response) {
            return Err(ClientError::Protocol(err));
        }

        let next_batch = response
            .get("next_batch")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField("next_batch"))?
            .to_owned();

        if let Some(presence) = response.get("presence") {
            self.process_presence(presence).await;
        }
        if let Some(rooms) = response.get("rooms") {
            self.process_rooms(rooms).await;
        }
        if let Some(groups) = response.get("groups") {
            self.process_groups(groups);
        }

        debug!(cursor = %next_batch, "sync batch processed");
        self.since = Some(next_batch);
        Ok(())
    }

    async fn process_presence(&mut self, value: &Value) {
        for raw in events_in(Some(value)) {
            match classify(raw) {
                Ok(event) => self.dispatch(&event).await,
                Err(err) => warn!(error = %err, "dropping undecodable presence event"),
            }
        }
    }

    async fn process_rooms(&mut self, value: &Value) {
        if let Some(join) = value.get("join") {
            self.process_joined_rooms(join).await;
        }
        self.process_invited_rooms(value.get("invite"));
        self.process_left_rooms(value.get("leave"));
    }

    async fn process_joined_rooms(&mut self, rooms: &Value) {
        let Some(rooms) = rooms.as_object() else {
            return;
        };

        for (room_id, data) in rooms {
            self.ensure_room(room_id);

            if let Some(summary) = data.get("summary") {
                if let Some(room) = self.rooms.get_mut(room_id) {
                    room.apply_summary(summary);
                }
            }

            for raw in events_in(data.get("state")) {
                match classify(raw) {
                    Ok(event) => {
                        if let Some(room) = self.rooms.get_mut(room_id) {
                            room.apply_live(&event);
                        }
                        self.dispatch(&event).await;
                    }
                    Err(err) => {
                        warn!(room = %room_id, error = %err, "dropping undecodable state event");
                    }
                }
            }

            for raw in events_in(data.get("timeline")) {
                match classify(raw) {
                    Ok(event) => {
                        if let Some(room) = self.rooms.get_mut(room_id) {
                            match &event {
                                TypedEvent::State { .. } => room.apply_live(&event),
                                TypedEvent::Message { .. } => {
                                    room.record_message(event.clone());
                                }
                                _ => {}
                            }
                        }
                        self.dispatch(&event).await;
                    }
                    Err(err) => {
                        warn!(room = %room_id, error = %err, "dropping undecodable timeline event");
                    }
                }
            }

            for raw in events_in(data.get("ephemeral")) {
                // Typing indicators and other ephemeral kinds are not
                // persisted; only read receipts survive.
                if raw.get("type").and_then(Value::as_str) == Some("m.receipt") {
                    if let Some(content) = raw.get("content") {
                        if let Some(room) = self.rooms.get_mut(room_id) {
                            room.apply_receipts(content);
                        }
                    }
                }
            }
        }
    }

    /// Extension point: invite-room processing has no default behavior.
    fn process_invited_rooms(&mut self, _rooms: Option<&Value>) {}

    /// Extension point: left-room processing has no default behavior.
    fn process_left_rooms(&mut self, _rooms: Option<&Value>) {}

    /// Extension point: group processing has no default behavior.
    fn process_groups(&mut self, _value: &Value) {}

    async fn dispatch(&self, event: &TypedEvent) {
        if let Some(handler) = self.handlers.get(event.event_type()) {
            handler(event.clone()).await;
        }
    }

    fn ensure_room(&mut self, room_id: &str) {
        if !self.rooms.contains_key(room_id) {
            self.rooms.insert(
                room_id.to_owned(),
                Room::with_cache_capacity(room_id, self.config.message_cache_capacity),
            );
        }
    }

    /// Repair a room by pulling its full state through the transport.
    pub async fn reconcile_room(&mut self, room_id: &str) -> Result<(), ClientError> {
        self.ensure_room(room_id);
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.reconcile(&self.api).await?;
        }
        Ok(())
    }

    pub async fn send_text(&self, target: &str, body: &str) -> Result<Value, ClientError> {
        self.send_message(target, "m.text", body, None).await
    }

    /// Send a text message with an HTML-formatted body alongside the
    /// plain-text fallback.
    pub async fn send_formatted_text(
        &self,
        target: &str,
        body: &str,
        formatted_body: &str,
    ) -> Result<Value, ClientError> {
        self.send_message(
            target,
            "m.text",
            body,
            Some(("org.matrix.custom.html", formatted_body)),
        )
        .await
    }

    pub async fn send_notice(&self, target: &str, body: &str) -> Result<Value, ClientError> {
        self.send_message(target, "m.notice", body, None).await
    }

    pub async fn send_emote(&self, target: &str, body: &str) -> Result<Value, ClientError> {
        self.send_message(target, "m.emote", body, None).await
    }

    // TODO: media message kinds (image/file/audio/location/video) need
    // upload support before they can be sent from here.
    async fn send_message(
        &self,
        target: &str,
        msgtype: &str,
        body: &str,
        formatted: Option<(&str, &str)>,
    ) -> Result<Value, ClientError> {
        let mut content = json!({"msgtype": msgtype, "body": body});
        if let Some((format, formatted_body)) = formatted {
            content["format"] = Value::String(format.to_owned());
            content["formatted_body"] = Value::String(formatted_body.to_owned());
        }
        self.api.room_send(target, "m.room.message", &content).await
    }

    /// Invalidate the session credential and stop the session.
    pub async fn logout(&mut self) -> Result<(), ClientError> {
        self.api.logout().await?;
        self.lifecycle.stop();
        Ok(())
    }
}

fn events_in<'a>(section: Option<&'a Value>) -> impl Iterator<Item = &'a Value> + 'a {
    section
        .and_then(|section| section.get("events"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use hermod_core::EventContent;
    use serde_json::json;

    use super::*;
    use crate::{testutil::MockTransport, transport::ApiConfig};

    fn engine_with(mock: &Arc<MockTransport>) -> SyncEngine<Arc<MockTransport>> {
        let api = Api::new(
            Arc::clone(mock),
            "https://matrix.example.org",
            ApiConfig::default(),
        )
        .expect("homeserver URL must parse");
        SyncEngine::new(api, SyncConfig::default())
    }

    fn polling_engine(mock: &Arc<MockTransport>) -> SyncEngine<Arc<MockTransport>> {
        let mut engine = engine_with(mock);
        engine
            .restore_session(Session {
                access_token: "syt_token".to_owned(),
                device_id: Some("HERMOD1".to_owned()),
                user_id: Some("@bot:example.org".to_owned()),
            })
            .expect("restore must arm the loop");
        engine
    }

    fn message_payload(event_id: &str, body: &str) -> Value {
        json!({
            "type": "m.room.message",
            "sender": "@alice:example.org",
            "event_id": event_id,
            "origin_server_ts": 1_700_000_000_000_u64,
            "content": {"msgtype": "m.text", "body": body},
        })
    }

    fn topic_payload(topic: &str) -> Value {
        json!({
            "type": "m.room.topic",
            "sender": "@alice:example.org",
            "event_id": "$topic",
            "origin_server_ts": 1_700_000_000_000_u64,
            "state_key": "",
            "content": {"topic": topic},
        })
    }

    #[tokio::test]
    async fn login_moves_to_polling_with_cursor_unset() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({
            "access_token": "syt_abc",
            "device_id": "DEV1",
            "user_id": "@bot:example.org",
        }));
        let mut engine = engine_with(&mock);

        engine
            .login(&LoginCredentials::Password {
                user_id: "@bot:example.org".to_owned(),
                password: "secret".to_owned(),
            })
            .await
            .expect("login must succeed");

        assert_eq!(engine.state(), SessionState::Polling);
        assert_eq!(engine.cursor(), None);
    }

    #[tokio::test]
    async fn login_protocol_error_is_surfaced_and_disarms() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({"errcode": "M_FORBIDDEN", "error": "nope"}));
        let mut engine = engine_with(&mock);

        let err = engine
            .login(&LoginCredentials::Token("tok".to_owned()))
            .await
            .expect_err("protocol error must surface");
        assert!(matches!(err, ClientError::Protocol(ref p) if p.errcode == "M_FORBIDDEN"));
        assert_eq!(engine.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn joined_room_batch_updates_topic_and_caches_messages_in_order() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({
            "next_batch": "s1",
            "rooms": {
                "join": {
                    "!lobby:example.org": {
                        "state": {"events": [topic_payload("all things rust")]},
                        "timeline": {"events": [
                            message_payload("$m1", "first"),
                            message_payload("$m2", "second"),
                        ]},
                        "ephemeral": {"events": []},
                    },
                },
                "invite": {},
                "leave": {},
            },
        }));
        let mut engine = polling_engine(&mock);

        engine.sync_once().await.expect("sync must succeed");

        assert_eq!(engine.cursor(), Some("s1"));
        let room = engine
            .room("!lobby:example.org")
            .expect("room must be created lazily");
        assert_eq!(room.topic, "all things rust");
        let ids: Vec<_> = room
            .messages()
            .iter()
            .filter_map(TypedEvent::event_id)
            .collect();
        assert_eq!(ids, vec!["$m1", "$m2"]);
    }

    #[tokio::test]
    async fn timeline_state_events_reconcile_room_state() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({
            "next_batch": "s1",
            "rooms": {"join": {"!lobby:example.org": {
                "timeline": {"events": [topic_payload("from the timeline")]},
            }}},
        }));
        let mut engine = polling_engine(&mock);

        engine.sync_once().await.expect("sync must succeed");
        assert_eq!(
            engine.room("!lobby:example.org").expect("room exists").topic,
            "from the timeline"
        );
    }

    #[tokio::test]
    async fn undecodable_events_are_dropped_without_aborting_the_batch() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({
            "next_batch": "s1",
            "rooms": {"join": {"!lobby:example.org": {
                "timeline": {"events": [
                    {"type": "org.example.widget", "sender": "@x:example.org",
                     "event_id": "$w", "origin_server_ts": 1_u64, "content": {}},
                    message_payload("$m1", "still here"),
                ]},
            }}},
        }));
        let mut engine = polling_engine(&mock);

        engine.sync_once().await.expect("batch must survive");
        assert_eq!(
            engine
                .room("!lobby:example.org")
                .expect("room exists")
                .messages()
                .len(),
            1
        );
        assert_eq!(engine.cursor(), Some("s1"));
    }

    #[tokio::test]
    async fn ephemeral_receipts_update_the_table_and_typing_is_ignored() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({
            "next_batch": "s1",
            "rooms": {"join": {"!lobby:example.org": {
                "ephemeral": {"events": [
                    {"type": "m.receipt", "content": {
                        "$m1": {"m.read": {"@alice:example.org": {"ts": 42}}},
                    }},
                    {"type": "m.typing", "content": {"user_ids": ["@alice:example.org"]}},
                ]},
            }}},
        }));
        let mut engine = polling_engine(&mock);

        engine.sync_once().await.expect("sync must succeed");
        let room = engine.room("!lobby:example.org").expect("room exists");
        assert_eq!(
            room.read_receipt("@alice:example.org"),
            Some(&("$m1".to_owned(), 42))
        );
    }

    #[tokio::test]
    async fn dispatches_at_most_one_handler_per_event_type() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({
            "next_batch": "s1",
            "rooms": {"join": {"!lobby:example.org": {
                "state": {"events": [topic_payload("ignored by handler")]},
                "timeline": {"events": [
                    message_payload("$m1", "one"),
                    message_payload("$m2", "two"),
                ]},
            }}},
        }));
        let mut engine = polling_engine(&mock);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        engine.register_handler("m.room.message", move |event: TypedEvent| {
            let counter = Arc::clone(&counter);
            async move {
                if let EventContent::Text(_) = event.content() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        engine.sync_once().await.expect("sync must succeed");
        // Two messages dispatched; the topic event has no handler and is a
        // no-op.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_halts_and_faults_on_protocol_error() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({"next_batch": "s1"}));
        mock.push_json(json!({"errcode": "M_UNKNOWN_TOKEN", "error": "expired"}));
        let mut engine = polling_engine(&mock);

        let err = engine.run().await.expect_err("protocol error must halt");
        assert!(matches!(err, ClientError::Protocol(ref p) if p.errcode == "M_UNKNOWN_TOKEN"));
        assert_eq!(engine.state(), SessionState::Faulted);
        // The first batch was fully processed before the fault.
        assert_eq!(engine.cursor(), Some("s1"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_before_polling() {
        let mock = Arc::new(MockTransport::new());
        let mut engine = polling_engine(&mock);

        engine.stop_handle().cancel();
        engine.run().await.expect("cancelled run must stop cleanly");
        assert_eq!(engine.state(), SessionState::Stopped);
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn run_requires_an_armed_session() {
        let mock = Arc::new(MockTransport::new());
        let mut engine = engine_with(&mock);
        let err = engine.run().await.expect_err("run needs a session");
        assert!(matches!(err, ClientError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn send_text_posts_message_content() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({"event_id": "$sent"}));
        let engine = polling_engine(&mock);

        engine
            .send_text("!lobby:example.org", "hello")
            .await
            .expect("send must succeed");

        let recorded = mock.recorded();
        assert_eq!(recorded[0].method, "PUT");
        let body = recorded[0].body.as_ref().expect("send carries a body");
        assert_eq!(body["msgtype"], "m.text");
        assert_eq!(body["body"], "hello");
    }

    #[tokio::test]
    async fn send_formatted_text_includes_format_fields() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({"event_id": "$sent"}));
        let engine = polling_engine(&mock);

        engine
            .send_formatted_text("!lobby:example.org", "hello", "<b>hello</b>")
            .await
            .expect("send must succeed");

        let body = mock.recorded()[0]
            .body
            .clone()
            .expect("send carries a body");
        assert_eq!(body["format"], "org.matrix.custom.html");
        assert_eq!(body["formatted_body"], "<b>hello</b>");
    }

    #[tokio::test]
    async fn notice_and_emote_helpers_set_their_subtype() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({"event_id": "$n"}));
        mock.push_json(json!({"event_id": "$e"}));
        let engine = polling_engine(&mock);

        engine
            .send_notice("!lobby:example.org", "for the record")
            .await
            .expect("notice must send");
        engine
            .send_emote("!lobby:example.org", "waves")
            .await
            .expect("emote must send");

        let recorded = mock.recorded();
        let notice = recorded[0].body.as_ref().expect("notice carries a body");
        assert_eq!(notice["msgtype"], "m.notice");
        assert_eq!(notice["body"], "for the record");
        let emote = recorded[1].body.as_ref().expect("emote carries a body");
        assert_eq!(emote["msgtype"], "m.emote");
        assert_eq!(emote["body"], "waves");
    }

    #[tokio::test]
    async fn reconcile_room_pulls_full_state_through_the_store() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!([
            {
                "type": "m.room.name",
                "sender": "@alice:example.org",
                "event_id": "$n1",
                "origin_server_ts": 1_700_000_000_000_u64,
                "state_key": "",
                "content": {"name": "Lobby"},
            },
        ]));
        let mut engine = polling_engine(&mock);

        engine
            .reconcile_room("!lobby:example.org")
            .await
            .expect("reconcile must succeed");

        assert_eq!(
            engine
                .room("!lobby:example.org")
                .expect("room must be created lazily")
                .name
                .as_deref(),
            Some("Lobby")
        );
        assert!(mock.recorded()[0].url.contains("rooms/!lobby:example.org/state"));
    }

    #[tokio::test]
    async fn logout_stops_the_session() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(json!({}));
        let mut engine = polling_engine(&mock);

        engine.logout().await.expect("logout must succeed");
        assert_eq!(engine.state(), SessionState::Stopped);
        assert!(!engine.api().is_logged_in());
    }
}
