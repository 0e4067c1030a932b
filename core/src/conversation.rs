/// Conversation identity: participant ids and the canonical key two clients
/// agree on without coordination.
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the two ids in a conversation key.
/// Identity providers must never issue ids containing it.
pub const KEY_SEPARATOR: char = '_';

/// Opaque user identifier, ordered lexicographically by bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Canonical id of a one-to-one conversation: "{min_id}_{max_id}"
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the key back into its two participants, smaller id first.
    pub fn participants(&self) -> Option<(ParticipantId, ParticipantId)> {
        let (a, b) = self.0.split_once(KEY_SEPARATOR)?;
        if a.is_empty() || b.is_empty() || b.contains(KEY_SEPARATOR) {
            return None;
        }
        Some((ParticipantId::from(a), ParticipantId::from(b)))
    }

    /// The other party of this conversation, as seen by `me`.
    pub fn peer_of(&self, me: &ParticipantId) -> Option<ParticipantId> {
        let (a, b) = self.participants()?;
        if &a == me {
            Some(b)
        } else if &b == me {
            Some(a)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the conversation key for a pair of participants.
///
/// Symmetric in its arguments. Fails with `InvalidParticipants` when the ids
/// are equal or either one is empty.
pub fn resolve(a: &ParticipantId, b: &ParticipantId) -> Result<ConversationKey> {
    if a.is_empty() || b.is_empty() {
        return Err(ChatError::InvalidParticipants(
            "participant id must not be empty".to_string(),
        ));
    }
    if a == b {
        return Err(ChatError::InvalidParticipants(format!(
            "cannot open a conversation of {} with itself",
            a
        )));
    }

    let (low, high) = if a < b { (a, b) } else { (b, a) };
    Ok(ConversationKey(format!(
        "{}{}{}",
        low.as_str(),
        KEY_SEPARATOR,
        high.as_str()
    )))
}
