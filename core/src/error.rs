/// Error types for the messaging core
use crate::conversation::ParticipantId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// One or both conversation summaries could not be written.
///
/// The message itself is already stored when this is produced; the caller
/// decides whether to retry `on_message_sent`.
#[derive(Error, Debug)]
#[error("Summary update failed for {}: {}", display_owners(.who), .reason)]
pub struct SummaryUpdateError {
    /// Owners whose summary write failed (sender first when both failed)
    pub who: Vec<ParticipantId>,
    pub reason: String,
}

fn display_owners(who: &[ParticipantId]) -> String {
    who.iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
