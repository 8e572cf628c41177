use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;

/// Relation synthesized for reaction events from the nested
/// `m.relates_to` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReactionRelation {
    pub rel_type: String,
    pub event_id: String,
    pub key: String,
}

/// Normalized reply relation extracted from a message's `m.relates_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRelation {
    /// Event id of the message being replied to.
    pub event_id: String,
}

/// Reference to the room replaced by a room upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreviousRoom {
    pub room_id: String,
    pub event_id: String,
}

/// Text-shaped message content, shared by `m.text`, `m.emote`, `m.notice`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextContent {
    pub body: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub formatted_body: Option<String>,
    /// Reply relation, normalized out of `m.relates_to` during decode.
    #[serde(skip)]
    pub in_reply_to: Option<MessageRelation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThumbnailInfo {
    pub h: u64,
    pub w: u64,
    pub mimetype: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageInfo {
    pub h: u64,
    pub w: u64,
    pub mimetype: String,
    pub size: u64,
    #[serde(default)]
    pub thumbnail_info: Option<ThumbnailInfo>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileInfo {
    pub mimetype: String,
    pub size: u64,
    #[serde(default)]
    pub thumbnail_info: Option<ThumbnailInfo>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AudioInfo {
    pub duration: u64,
    pub mimetype: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoInfo {
    pub h: u64,
    pub w: u64,
    pub mimetype: String,
    pub size: u64,
    pub duration: u64,
    #[serde(default)]
    pub thumbnail_info: Option<ThumbnailInfo>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocationInfo {
    #[serde(default)]
    pub thumbnail_info: Option<ThumbnailInfo>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageContent {
    pub body: String,
    pub info: ImageInfo,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileContent {
    pub body: String,
    pub filename: String,
    pub info: FileInfo,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AudioContent {
    pub body: String,
    pub info: AudioInfo,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocationContent {
    pub body: String,
    pub geo_uri: String,
    #[serde(default)]
    pub info: Option<LocationInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoContent {
    pub body: String,
    pub info: VideoInfo,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceContent {
    pub presence: String,
    #[serde(default)]
    pub last_active_ago: Option<u64>,
    #[serde(default)]
    pub currently_active: Option<bool>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AliasesContent {
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CanonicalAliasContent {
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateContent {
    pub creator: String,
    #[serde(default = "default_room_version")]
    pub room_version: String,
    #[serde(rename = "m.federate", default = "default_federate")]
    pub federate: bool,
    #[serde(default)]
    pub predecessor: Option<PreviousRoom>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoinRulesContent {
    pub join_rule: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemberContent {
    pub membership: String,
    #[serde(default)]
    pub is_direct: bool,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PowerLevelsContent {
    #[serde(default = "default_level_50")]
    pub ban: i64,
    #[serde(default)]
    pub events: HashMap<String, i64>,
    #[serde(default)]
    pub events_default: i64,
    #[serde(default = "default_level_50")]
    pub invite: i64,
    #[serde(default = "default_level_50")]
    pub kick: i64,
    #[serde(default = "default_level_50")]
    pub redact: i64,
    #[serde(default = "default_level_50")]
    pub state_default: i64,
    #[serde(default)]
    pub users: HashMap<String, i64>,
    #[serde(default)]
    pub users_default: i64,
    #[serde(default = "default_notifications")]
    pub notifications: HashMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RedactionContent {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelatedGroupsContent {
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicContent {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NameContent {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryVisibilityContent {
    pub history_visibility: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AvatarContent {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuestAccessContent {
    pub guest_access: String,
}

fn default_room_version() -> String {
    "1".to_owned()
}

fn default_federate() -> bool {
    true
}

fn default_level_50() -> i64 {
    50
}

fn default_notifications() -> HashMap<String, i64> {
    HashMap::from([("room".to_owned(), 50)])
}

/// Decoded content of a typed event.
///
/// The variant is determined by the protocol type string (and `msgtype`
/// for messages). Adding a recognized kind means adding a variant here and
/// an arm in [`decode_content`]; consumers pattern-match exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum EventContent {
    Text(TextContent),
    Emote(TextContent),
    Notice(TextContent),
    Image(ImageContent),
    File(FileContent),
    Audio(AudioContent),
    Location(LocationContent),
    Video(VideoContent),
    Presence(PresenceContent),
    Aliases(AliasesContent),
    CanonicalAlias(CanonicalAliasContent),
    Create(CreateContent),
    JoinRules(JoinRulesContent),
    Member(MemberContent),
    PowerLevels(PowerLevelsContent),
    Redaction(RedactionContent),
    RelatedGroups(RelatedGroupsContent),
    Topic(TopicContent),
    Name(NameContent),
    HistoryVisibility(HistoryVisibilityContent),
    /// Bot-options content, kept verbatim.
    BotOptions(Value),
    Reaction(ReactionRelation),
    Avatar(AvatarContent),
    GuestAccess(GuestAccessContent),
}

/// Decode a raw content blob according to its event type string.
///
/// Unresolved types fail closed with [`DecodeError::UnknownType`] rather
/// than silently dropping fields.
pub fn decode_content(event_type: &str, content: &Value) -> Result<EventContent, DecodeError> {
    match event_type {
        "m.room.message" => decode_message_content(content),
        "m.presence" => Ok(EventContent::Presence(shape(event_type, content)?)),
        "m.reaction" => decode_reaction_content(content),
        "m.room.bot.options" => Ok(EventContent::BotOptions(content.clone())),
        "m.room.aliases" => Ok(EventContent::Aliases(shape(event_type, content)?)),
        "m.room.canonical_alias" => Ok(EventContent::CanonicalAlias(shape(event_type, content)?)),
        "m.room.create" => Ok(EventContent::Create(shape(event_type, content)?)),
        "m.room.join_rules" => Ok(EventContent::JoinRules(shape(event_type, content)?)),
        "m.room.member" => Ok(EventContent::Member(shape(event_type, content)?)),
        "m.room.power_levels" => Ok(EventContent::PowerLevels(shape(event_type, content)?)),
        "m.room.redaction" => Ok(EventContent::Redaction(shape(event_type, content)?)),
        "m.room.related_groups" => Ok(EventContent::RelatedGroups(shape(event_type, content)?)),
        "m.room.topic" => Ok(EventContent::Topic(shape(event_type, content)?)),
        "m.room.name" => Ok(EventContent::Name(shape(event_type, content)?)),
        "m.room.history_visibility" => {
            Ok(EventContent::HistoryVisibility(shape(event_type, content)?))
        }
        "m.room.avatar" => Ok(EventContent::Avatar(shape(event_type, content)?)),
        "m.room.guest_access" => Ok(EventContent::GuestAccess(shape(event_type, content)?)),
        other => Err(DecodeError::UnknownType(other.to_owned())),
    }
}

fn decode_message_content(content: &Value) -> Result<EventContent, DecodeError> {
    let msgtype = content
        .get("msgtype")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField("msgtype"))?;

    match msgtype {
        "m.text" => Ok(EventContent::Text(decode_text_content(msgtype, content)?)),
        "m.emote" => Ok(EventContent::Emote(decode_text_content(msgtype, content)?)),
        "m.notice" => Ok(EventContent::Notice(decode_text_content(msgtype, content)?)),
        "m.image" => Ok(EventContent::Image(shape(msgtype, content)?)),
        "m.file" => Ok(EventContent::File(shape(msgtype, content)?)),
        "m.audio" => Ok(EventContent::Audio(shape(msgtype, content)?)),
        "m.location" => Ok(EventContent::Location(shape(msgtype, content)?)),
        "m.video" => Ok(EventContent::Video(shape(msgtype, content)?)),
        other => Err(DecodeError::UnknownMessageType(other.to_owned())),
    }
}

fn decode_text_content(msgtype: &str, content: &Value) -> Result<TextContent, DecodeError> {
    let mut text: TextContent = shape(msgtype, content)?;
    // Reply relations are normalized to the replied-to event id; any inline
    // edit payload (`m.new_content`) is discarded.
    text.in_reply_to = content
        .get("m.relates_to")
        .and_then(|rel| rel.get("m.in_reply_to"))
        .and_then(|reply| reply.get("event_id"))
        .and_then(Value::as_str)
        .map(|event_id| MessageRelation {
            event_id: event_id.to_owned(),
        });
    Ok(text)
}

fn decode_reaction_content(content: &Value) -> Result<EventContent, DecodeError> {
    let relates_to = content
        .get("m.relates_to")
        .ok_or(DecodeError::MissingField("m.relates_to"))?;
    Ok(EventContent::Reaction(shape("m.reaction", relates_to)?))
}

fn shape<T: serde::de::DeserializeOwned>(
    event_type: &str,
    content: &Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(content.clone()).map_err(|err| DecodeError::MalformedContent {
        event_type: event_type.to_owned(),
        detail: err.to_string(),
    })
}
