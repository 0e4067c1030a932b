/// Projects a sent message into both participants' chat lists
use crate::conversation::{resolve, ParticipantId};
use crate::error::SummaryUpdateError;
use crate::messenger_types::{ConversationSummary, Message};
use crate::store::RemoteStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stateless between calls. The two writes are independent: one may land
/// while the other fails, and the store's monotonic guard keeps a late
/// retry of an older send from regressing either side.
#[derive(Clone)]
pub struct SummaryUpdater {
    store: Arc<dyn RemoteStore>,
}

impl SummaryUpdater {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Update both summaries for a message that is already stored.
    ///
    /// No retry here; on failure the error names every owner whose write
    /// did not go through and the caller may call this again.
    pub async fn on_message_sent(&self, msg: &Message) -> Result<(), SummaryUpdateError> {
        let key = resolve(&msg.sender_id, &msg.receiver_id).map_err(|e| SummaryUpdateError {
            who: vec![msg.sender_id.clone(), msg.receiver_id.clone()],
            reason: e.to_string(),
        })?;

        let project = |owner: &ParticipantId, peer: &ParticipantId| ConversationSummary {
            owner_id: owner.clone(),
            peer_id: peer.clone(),
            last_message_text: msg.text.clone(),
            last_message_at: msg.sent_at,
            last_message_id: msg.id.clone(),
            conversation_key: key.clone(),
        };
        let for_sender = project(&msg.sender_id, &msg.receiver_id);
        let for_receiver = project(&msg.receiver_id, &msg.sender_id);

        let (sender_result, receiver_result) = tokio::join!(
            self.store.merge_summary(&for_sender),
            self.store.merge_summary(&for_receiver),
        );

        let mut who = Vec::new();
        let mut reasons = Vec::new();
        for (owner, result) in [
            (&msg.sender_id, sender_result),
            (&msg.receiver_id, receiver_result),
        ] {
            match result {
                Ok(true) => debug!("Summary of {} now at message {}", owner, msg.id),
                Ok(false) => debug!("Summary of {} already newer than {}", owner, msg.id),
                Err(e) => {
                    warn!("Summary write for {} failed: {}", owner, e);
                    who.push(owner.clone());
                    reasons.push(e.to_string());
                }
            }
        }

        if who.is_empty() {
            Ok(())
        } else {
            Err(SummaryUpdateError {
                who,
                reason: reasons.join("; "),
            })
        }
    }
}
