use std::collections::{HashMap, VecDeque};

use hermod_core::{
    classify,
    content::{PowerLevelsContent, PreviousRoom},
    ClientError, EventContent, TypedEvent,
};
use serde_json::Value;
use tracing::warn;

use crate::{http::HttpTransport, transport::Api};

/// Default bound for the per-room recent-message cache.
pub const DEFAULT_MESSAGE_CACHE_CAPACITY: usize = 1000;

const MEMBER_EVENT_TYPE: &str = "m.room.member";

/// Current state of one room plus a bounded recent-message cache.
///
/// One instance per room identifier, created lazily on first reference and
/// kept for the process lifetime. State fields form a last-writer-wins
/// register per (event type, state key); only the current value is held.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub name: Option<String>,
    pub topic: String,
    pub join_rule: Option<String>,
    pub history_visibility: Option<String>,
    pub creator: Option<String>,
    pub room_version: String,
    pub federated: bool,
    pub predecessor: Option<PreviousRoom>,
    pub canonical_alias: Option<String>,
    pub aliases: Option<Vec<String>>,
    pub groups: Option<Vec<String>>,
    pub power_levels: Option<PowerLevelsContent>,
    /// Bot-specific options, kept verbatim.
    pub bot_options: Option<Value>,
    pub heroes: Option<Vec<String>>,
    pub joined_member_count: Option<u64>,
    pub invited_member_count: Option<u64>,
    read_receipts: HashMap<String, (String, u64)>,
    message_cache: VecDeque<TypedEvent>,
    cache_capacity: usize,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_cache_capacity(id, DEFAULT_MESSAGE_CACHE_CAPACITY)
    }

    /// Create a room with a fixed message-cache bound (`capacity >= 1`).
    pub fn with_cache_capacity(id: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            name: None,
            topic: String::new(),
            join_rule: None,
            history_visibility: None,
            creator: None,
            room_version: "1".to_owned(),
            federated: true,
            predecessor: None,
            canonical_alias: None,
            aliases: None,
            groups: None,
            power_levels: None,
            bot_options: None,
            heroes: None,
            joined_member_count: None,
            invited_member_count: None,
            read_receipts: HashMap::new(),
            message_cache: VecDeque::new(),
            cache_capacity: capacity.max(1),
        }
    }

    /// Apply a state event arriving through the live sync stream.
    ///
    /// Idempotent. Non-state variants and membership events are skipped;
    /// membership is handled, if at all, by a dedicated pipeline.
    pub fn apply_live(&mut self, event: &TypedEvent) {
        let TypedEvent::State { core, .. } = event else {
            return;
        };
        if core.event_type == MEMBER_EVENT_TYPE {
            return;
        }
        self.apply_content(&core.content);
    }

    fn apply_content(&mut self, content: &EventContent) {
        match content {
            EventContent::Topic(topic) => self.topic = topic.topic.clone(),
            EventContent::Name(name) => self.name = Some(name.name.clone()),
            EventContent::RelatedGroups(groups) => self.groups = Some(groups.groups.clone()),
            EventContent::JoinRules(rules) => self.join_rule = Some(rules.join_rule.clone()),
            EventContent::HistoryVisibility(visibility) => {
                self.history_visibility = Some(visibility.history_visibility.clone());
            }
            EventContent::Create(create) => {
                self.creator = Some(create.creator.clone());
                self.federated = create.federate;
                self.room_version = create.room_version.clone();
                self.predecessor = create.predecessor.clone();
            }
            EventContent::CanonicalAlias(alias) => self.canonical_alias = alias.alias.clone(),
            EventContent::Aliases(aliases) => self.aliases = Some(aliases.aliases.clone()),
            EventContent::BotOptions(options) => self.bot_options = Some(options.clone()),
            EventContent::PowerLevels(levels) => self.power_levels = Some(levels.clone()),
            // Unrecognized shapes are no-ops.
            _ => {}
        }
    }

    /// Repair room state by fetching and replaying the full state set.
    ///
    /// Every returned state event goes through the same idempotent apply
    /// path as live events; undecodable events are dropped individually.
    pub async fn reconcile<T: HttpTransport>(&mut self, api: &Api<T>) -> Result<(), ClientError> {
        let state = api.get_room_state(&self.id).await?;
        let Some(events) = state.as_array() else {
            return Ok(());
        };

        for raw in events {
            match classify(raw) {
                Ok(event) => self.apply_live(&event),
                Err(err) => {
                    warn!(room = %self.id, error = %err, "dropping undecodable state event");
                }
            }
        }
        Ok(())
    }

    /// Insert a message event into the bounded cache.
    ///
    /// Duplicates by event id are suppressed; once at capacity the oldest
    /// entry is evicted. Returns whether the event was inserted.
    pub fn record_message(&mut self, event: TypedEvent) -> bool {
        let Some(event_id) = event.event_id() else {
            return false;
        };
        if self
            .message_cache
            .iter()
            .any(|cached| cached.event_id() == Some(event_id))
        {
            return false;
        }

        self.message_cache.push_back(event);
        if self.message_cache.len() > self.cache_capacity {
            self.message_cache.pop_front();
        }
        true
    }

    /// Cached messages in arrival order, oldest first.
    pub fn messages(&self) -> &VecDeque<TypedEvent> {
        &self.message_cache
    }

    /// Overwrite per-user read receipts from an `m.receipt` content blob.
    ///
    /// Only `m.read` entries are persisted; other receipt kinds are ignored.
    pub fn apply_receipts(&mut self, content: &Value) {
        let Some(receipts) = content.as_object() else {
            return;
        };
        for (event_id, receipt) in receipts {
            let Some(users) = receipt.get("m.read").and_then(Value::as_object) else {
                continue;
            };
            for (user, data) in users {
                let Some(ts) = data.get("ts").and_then(Value::as_u64) else {
                    continue;
                };
                self.read_receipts
                    .insert(user.clone(), (event_id.clone(), ts));
            }
        }
    }

    /// Last-read event id and timestamp for a user, when known.
    pub fn read_receipt(&self, user: &str) -> Option<&(String, u64)> {
        self.read_receipts.get(user)
    }

    /// Update membership counts and heroes from the sync room summary.
    pub fn apply_summary(&mut self, summary: &Value) {
        if let Some(heroes) = summary.get("m.heroes").and_then(Value::as_array) {
            self.heroes = Some(
                heroes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect(),
            );
        }
        if let Some(joined) = summary.get("m.joined_member_count").and_then(Value::as_u64) {
            self.joined_member_count = Some(joined);
        }
        if let Some(invited) = summary
            .get("m.invited_member_count")
            .and_then(Value::as_u64)
        {
            self.invited_member_count = Some(invited);
        }
    }
}

impl PartialEq for Room {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
