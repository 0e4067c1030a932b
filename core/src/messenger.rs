/// Messenger facade used by the UI layer: send, open a conversation, list chats
use crate::conversation::{resolve, ParticipantId};
use crate::error::{ChatError, Result, SummaryUpdateError};
use crate::message_feed::FeedSubscription;
use crate::messenger_types::{format_local_time, now_millis, ChatListEntry, Message};
use crate::profile_store::ProfileStore;
use crate::store::RemoteStore;
use crate::summary_updater::SummaryUpdater;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of a send. The message is stored even when `summary_error` is set.
#[derive(Debug)]
pub struct SendOutcome {
    pub message: Message,
    pub summary_error: Option<SummaryUpdateError>,
}

/// Messaging for the signed-in user
#[derive(Clone)]
pub struct Messenger {
    me: ParticipantId,
    store: Arc<dyn RemoteStore>,
    updater: SummaryUpdater,
    profiles: Option<ProfileStore>,
}

impl Messenger {
    pub fn new(store: Arc<dyn RemoteStore>, me: ParticipantId) -> Self {
        let updater = SummaryUpdater::new(store.clone());
        Self {
            me,
            store,
            updater,
            profiles: None,
        }
    }

    /// Resolve chat list names from `profiles`
    pub fn with_profiles(mut self, profiles: ProfileStore) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn me(&self) -> &ParticipantId {
        &self.me
    }

    /// Send `text` to `to`, stamped with the current time
    pub async fn send(&self, to: &ParticipantId, text: &str) -> Result<SendOutcome> {
        self.send_at(to, text, now_millis()).await
    }

    /// Send with an explicit timestamp (clients with their own clock source)
    pub async fn send_at(&self, to: &ParticipantId, text: &str, sent_at: i64) -> Result<SendOutcome> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let key = resolve(&self.me, to)?;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender_id: self.me.clone(),
            receiver_id: to.clone(),
            sent_at,
        };
        self.store.append_message(&key, &message).await?;
        info!("Sent message {} to {} in {}", message.id, to, key);

        let summary_error = match self.updater.on_message_sent(&message).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Message {} stored but summaries lag: {}", message.id, e);
                Some(e)
            }
        };

        Ok(SendOutcome {
            message,
            summary_error,
        })
    }

    /// Retry the summary projection of an already stored message
    pub async fn retry_summaries(&self, message: &Message) -> std::result::Result<(), SummaryUpdateError> {
        self.updater.on_message_sent(message).await
    }

    /// Open the live, ordered view of the conversation with `peer`
    pub async fn open_conversation(&self, peer: &ParticipantId) -> Result<FeedSubscription> {
        let key = resolve(&self.me, peer)?;
        FeedSubscription::start(self.store.clone(), key).await
    }

    /// Chat list: most recent conversation first
    pub async fn chat_list(&self) -> Result<Vec<ChatListEntry>> {
        let mut summaries = self.store.summaries(&self.me).await?;
        summaries.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });

        Ok(summaries
            .into_iter()
            .map(|s| {
                let display_name = match &self.profiles {
                    Some(profiles) => profiles.display_name(&s.peer_id),
                    None => s.peer_id.to_string(),
                };
                ChatListEntry {
                    peer_id: s.peer_id,
                    display_name,
                    last_message_text: s.last_message_text,
                    time: format_local_time(s.last_message_at),
                    last_message_at: s.last_message_at,
                    conversation_key: s.conversation_key,
                }
            })
            .collect())
    }
}
