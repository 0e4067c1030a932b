/// Message persistence: conversation logs and summaries stored in sled DB
/// One tree per conversation log, one tree per summary owner.
use crate::conversation::{ConversationKey, ParticipantId};
use crate::error::{ChatError, Result};
use crate::messenger_types::{ConversationSummary, FeedSignal, Message, MessageRecord};
use crate::store::{RemoteStore, DEFAULT_FEED_BUFFER};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct MessageStore {
    db: sled::Db,
    buffer: usize,
}

fn storage(context: &'static str) -> impl Fn(sled::Error) -> ChatError {
    move |e| ChatError::Storage(format!("{}: {}", context, e))
}

/// Decode a stored document; undecodable bytes still yield a record with the
/// document id so the feed can hold it as unparsed.
fn decode_record(key: &[u8], value: &[u8]) -> MessageRecord {
    serde_json::from_slice::<MessageRecord>(value).unwrap_or_else(|_| MessageRecord {
        id: String::from_utf8_lossy(key).into_owned(),
        text: None,
        sender_id: None,
        receiver_id: None,
        sent_at: None,
    })
}

impl MessageStore {
    /// Create message store
    pub fn new(data_dir: &Path) -> Result<Self> {
        Self::with_buffer(data_dir, DEFAULT_FEED_BUFFER)
    }

    pub fn with_buffer(data_dir: &Path, buffer: usize) -> Result<Self> {
        let db_path = data_dir.join("messages.db");
        let db = sled::open(&db_path).map_err(storage("Failed to open messages DB"))?;

        info!("Message store opened at {:?}", db_path);
        Ok(Self {
            db,
            buffer: buffer.max(1),
        })
    }

    fn log_tree(&self, key: &ConversationKey) -> Result<sled::Tree> {
        self.db
            .open_tree(format!("log/{}", key))
            .map_err(storage("Failed to open conversation log"))
    }

    fn summary_tree(&self, owner: &ParticipantId) -> Result<sled::Tree> {
        self.db
            .open_tree(format!("chats/{}", owner))
            .map_err(storage("Failed to open summaries"))
    }

    /// All records of a conversation in storage order
    pub fn records(&self, key: &ConversationKey) -> Result<Vec<MessageRecord>> {
        let tree = self.log_tree(key)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (k, v) = entry.map_err(storage("Failed to read conversation log"))?;
            out.push(decode_record(&k, &v));
        }
        Ok(out)
    }

    /// Get message count
    pub fn count(&self, key: &ConversationKey) -> Result<usize> {
        Ok(self.log_tree(key)?.len())
    }
}

#[async_trait]
impl RemoteStore for MessageStore {
    async fn append_message(&self, key: &ConversationKey, message: &Message) -> Result<()> {
        let tree = self.log_tree(key)?;
        let value = serde_json::to_vec(&message.to_record()).map_err(ChatError::Serialization)?;

        tree.insert(message.id.as_bytes(), value)
            .map_err(storage("Failed to save message"))?;
        tree.flush_async()
            .await
            .map_err(storage("Failed to flush message"))?;

        debug!("Stored message {} in {}", message.id, key);
        Ok(())
    }

    async fn subscribe(&self, key: &ConversationKey) -> Result<mpsc::Receiver<FeedSignal>> {
        let tree = self.log_tree(key)?;
        // Watch before reading the snapshot; overlap is harmless, gaps are not
        let mut subscriber = tree.watch_prefix(Vec::<u8>::new());
        let snapshot = self.records(key)?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let key = key.clone();
        tokio::spawn(async move {
            if tx.send(FeedSignal::Batch(snapshot)).await.is_err() {
                return;
            }
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = &mut subscriber => event,
                };
                let Some(event) = event else { break };
                if let sled::Event::Insert { key: id, value } = event {
                    let record = decode_record(&id, &value);
                    if tx.send(FeedSignal::Batch(vec![record])).await.is_err() {
                        break;
                    }
                }
            }
            debug!("Sled feed for {} closed", key);
        });

        Ok(rx)
    }

    async fn merge_summary(&self, summary: &ConversationSummary) -> Result<bool> {
        let tree = self.summary_tree(&summary.owner_id)?;
        let slot = summary.peer_id.as_str().as_bytes();
        let value = serde_json::to_vec(summary).map_err(ChatError::Serialization)?;

        loop {
            let current = tree.get(slot).map_err(storage("Failed to read summary"))?;
            if let Some(bytes) = &current {
                let stored: ConversationSummary =
                    serde_json::from_slice(bytes).map_err(ChatError::Serialization)?;
                if !summary.supersedes(&stored) {
                    return Ok(false);
                }
            }

            match tree
                .compare_and_swap(slot, current, Some(value.clone()))
                .map_err(storage("Failed to write summary"))?
            {
                Ok(()) => break,
                // Lost a race with another writer, re-check against its value
                Err(_) => continue,
            }
        }

        tree.flush_async()
            .await
            .map_err(storage("Failed to flush summary"))?;
        Ok(true)
    }

    async fn summary(
        &self,
        owner: &ParticipantId,
        peer: &ParticipantId,
    ) -> Result<Option<ConversationSummary>> {
        let tree = self.summary_tree(owner)?;
        match tree
            .get(peer.as_str().as_bytes())
            .map_err(storage("Failed to read summary"))?
        {
            Some(val) => Ok(Some(
                serde_json::from_slice(&val).map_err(ChatError::Serialization)?,
            )),
            None => Ok(None),
        }
    }

    async fn summaries(&self, owner: &ParticipantId) -> Result<Vec<ConversationSummary>> {
        let tree = self.summary_tree(owner)?;
        let mut out = Vec::new();
        for entry in tree.iter().flatten() {
            let (_, val) = entry;
            if let Ok(s) = serde_json::from_slice::<ConversationSummary>(&val) {
                out.push(s);
            }
        }
        Ok(out)
    }
}

impl Clone for MessageStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            buffer: self.buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::resolve;
    use tempfile::TempDir;

    fn message(id: &str, at: i64) -> Message {
        Message {
            id: id.to_string(),
            text: format!("hello {}", id),
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            sent_at: at,
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let store = MessageStore::new(temp_dir.path()).unwrap();
        let key = resolve(&"alice".into(), &"bob".into()).unwrap();

        store.append_message(&key, &message("m1", 10)).await.unwrap();
        store.append_message(&key, &message("m2", 20)).await.unwrap();
        // Re-append of the same id overwrites
        store.append_message(&key, &message("m1", 10)).await.unwrap();

        assert_eq!(store.count(&key).unwrap(), 2);
        let records = store.records(&key).unwrap();
        assert_eq!(records[0].parse().unwrap(), message("m1", 10));
    }

    #[tokio::test]
    async fn test_merge_summary_guard_persists() {
        let temp_dir = TempDir::new().unwrap();
        let store = MessageStore::new(temp_dir.path()).unwrap();
        let key = resolve(&"alice".into(), &"bob".into()).unwrap();

        let newer = ConversationSummary {
            owner_id: "alice".into(),
            peer_id: "bob".into(),
            last_message_text: "newer".to_string(),
            last_message_at: 200,
            last_message_id: "m2".to_string(),
            conversation_key: key,
        };
        let mut older = newer.clone();
        older.last_message_text = "older".to_string();
        older.last_message_at = 150;

        assert!(store.merge_summary(&newer).await.unwrap());
        assert!(!store.merge_summary(&older).await.unwrap());

        let stored = store
            .summary(&"alice".into(), &"bob".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, newer);
        assert_eq!(store.summaries(&"alice".into()).await.unwrap().len(), 1);
        assert!(store.summaries(&"bob".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_snapshot_then_inserts() {
        let temp_dir = TempDir::new().unwrap();
        let store = MessageStore::new(temp_dir.path()).unwrap();
        let key = resolve(&"alice".into(), &"bob".into()).unwrap();
        store.append_message(&key, &message("m1", 10)).await.unwrap();

        let mut rx = store.subscribe(&key).await.unwrap();
        match rx.recv().await {
            Some(FeedSignal::Batch(records)) => assert_eq!(records.len(), 1),
            other => panic!("expected snapshot, got {:?}", other),
        }

        store.append_message(&key, &message("m2", 20)).await.unwrap();
        match rx.recv().await {
            Some(FeedSignal::Batch(records)) => assert_eq!(records[0].id, "m2"),
            other => panic!("expected insert batch, got {:?}", other),
        }
    }
}
