/// Shared types for the messaging core
use crate::conversation::{ConversationKey, ParticipantId};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Render a timestamp the way the chat list shows it ("9:15 PM").
pub fn format_time<Tz: TimeZone>(ts: Timestamp, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match DateTime::<Utc>::from_timestamp_millis(ts) {
        Some(dt) => dt.with_timezone(tz).format("%-I:%M %p").to_string(),
        None => String::new(),
    }
}

pub fn format_local_time(ts: Timestamp) -> String {
    format_time(ts, &Local)
}

/// One chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
    pub sent_at: Timestamp,
}

impl Message {
    /// Whether `me` wrote this message (bubble goes on the right)
    pub fn is_from(&self, me: &ParticipantId) -> bool {
        &self.sender_id == me
    }

    /// The raw record form written to a remote store
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id.clone(),
            text: Some(self.text.clone()),
            sender_id: Some(self.sender_id.clone()),
            receiver_id: Some(self.receiver_id.clone()),
            sent_at: Some(self.sent_at),
        }
    }
}

/// A message document as delivered by the remote store.
///
/// Only the document id is guaranteed; every other field may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sender_id: Option<ParticipantId>,
    #[serde(default)]
    pub receiver_id: Option<ParticipantId>,
    #[serde(default)]
    pub sent_at: Option<Timestamp>,
}

/// Why a record could not be turned into a `Message`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedRecord {
    MissingField(&'static str),
    SelfAddressed,
}

impl MessageRecord {
    pub fn parse(&self) -> std::result::Result<Message, MalformedRecord> {
        let text = self
            .text
            .clone()
            .ok_or(MalformedRecord::MissingField("text"))?;
        let sender_id = self
            .sender_id
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(MalformedRecord::MissingField("sender_id"))?;
        let receiver_id = self
            .receiver_id
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or(MalformedRecord::MissingField("receiver_id"))?;
        let sent_at = self
            .sent_at
            .ok_or(MalformedRecord::MissingField("sent_at"))?;

        if sender_id == receiver_id {
            return Err(MalformedRecord::SelfAddressed);
        }

        Ok(Message {
            id: self.id.clone(),
            text,
            sender_id,
            receiver_id,
            sent_at,
        })
    }
}

/// Per-owner projection of the latest message in one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub owner_id: ParticipantId,
    pub peer_id: ParticipantId,
    pub last_message_text: String,
    pub last_message_at: Timestamp,
    /// Id of the message this summary projects; breaks timestamp ties
    #[serde(default)]
    pub last_message_id: String,
    pub conversation_key: ConversationKey,
}

impl ConversationSummary {
    /// Monotonic guard over `(last_message_at, last_message_id)`, the same
    /// order the feed uses. Rewriting the same message applies, so a retry
    /// is idempotent.
    pub fn supersedes(&self, stored: &ConversationSummary) -> bool {
        (self.last_message_at, self.last_message_id.as_str())
            >= (stored.last_message_at, stored.last_message_id.as_str())
    }
}

/// What a remote subscription delivers
#[derive(Debug, Clone)]
pub enum FeedSignal {
    /// Inserted or re-delivered records; the first batch is the snapshot
    Batch(Vec<MessageRecord>),
    /// The transport lost its connection; delivery resumes after `Recovered`
    TransportError(String),
    Recovered,
}

/// Lifecycle of a conversation feed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeedState {
    #[default]
    Uninitialized,
    Syncing,
    Synced,
    Error(String),
}

/// What the UI renders for an open conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedView {
    pub state: FeedState,
    pub messages: Vec<Message>,
}

/// One row of the chat list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatListEntry {
    pub peer_id: ParticipantId,
    /// Profile name, or the peer id when no profile is known
    pub display_name: String,
    pub last_message_text: String,
    pub last_message_at: Timestamp,
    /// `last_message_at` in local time, "9:15 PM"
    pub time: String,
    pub conversation_key: ConversationKey,
}
