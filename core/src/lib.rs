/// SyncIn messaging core
///
/// Conversation identity, an ordered view over an unordered change feed, and
/// the per-user chat list projection kept consistent across both participants.

pub mod error;
pub mod config;
pub mod conversation;
pub mod messenger_types;
pub mod message_feed;
pub mod summary_updater;
pub mod store;
pub mod message_store;
pub mod profile_store;
pub mod messenger;
pub mod cli_app;

pub use config::Config;
pub use conversation::{resolve, ConversationKey, ParticipantId};
pub use error::{ChatError, Result, SummaryUpdateError};
pub use message_feed::{ConversationFeed, FeedSubscription};
pub use messenger::Messenger;
pub use store::{MemoryStore, RemoteStore};
pub use summary_updater::SummaryUpdater;
