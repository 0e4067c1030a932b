/// Remote document store seam and an in-process implementation
use crate::conversation::{ConversationKey, ParticipantId};
use crate::error::Result;
use crate::messenger_types::{ConversationSummary, FeedSignal, Message, MessageRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

pub const DEFAULT_FEED_BUFFER: usize = 64;

/// What the messaging core needs from the hosted backend.
///
/// Subscriptions are at-least-once and unordered. Transport failures are
/// delivered as `FeedSignal::TransportError`, distinct from an empty batch.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Append a message to the conversation log
    async fn append_message(&self, key: &ConversationKey, message: &Message) -> Result<()>;

    /// Start delivering the conversation's records. The first signal is a
    /// snapshot batch of everything stored so far.
    async fn subscribe(&self, key: &ConversationKey) -> Result<mpsc::Receiver<FeedSignal>>;

    /// Write `summary` unless the stored one for the same owner and peer is
    /// newer. Returns whether the write was applied.
    async fn merge_summary(&self, summary: &ConversationSummary) -> Result<bool>;

    async fn summary(
        &self,
        owner: &ParticipantId,
        peer: &ParticipantId,
    ) -> Result<Option<ConversationSummary>>;

    async fn summaries(&self, owner: &ParticipantId) -> Result<Vec<ConversationSummary>>;
}

#[derive(Default)]
struct MemoryInner {
    logs: HashMap<ConversationKey, Vec<MessageRecord>>,
    summaries: HashMap<(ParticipantId, ParticipantId), ConversationSummary>,
    feeds: HashMap<ConversationKey, broadcast::Sender<FeedSignal>>,
}

impl MemoryInner {
    fn feed(&mut self, key: &ConversationKey, buffer: usize) -> broadcast::Sender<FeedSignal> {
        self.feeds
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(buffer).0)
            .clone()
    }

    fn snapshot(&self, key: &ConversationKey) -> Vec<MessageRecord> {
        self.logs.get(key).cloned().unwrap_or_default()
    }
}

/// In-process store used by tests and local demos.
///
/// Besides the `RemoteStore` surface it can simulate transport loss
/// (`interrupt` / `restore`), duplicate delivery (`redeliver`) and
/// malformed documents (`append_raw`).
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
    buffer: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_FEED_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner::default())),
            buffer: buffer.max(1),
        }
    }

    /// Append a record as-is, even if it is incomplete
    pub async fn append_raw(&self, key: &ConversationKey, record: MessageRecord) {
        let mut inner = self.inner.write().await;
        inner
            .logs
            .entry(key.clone())
            .or_default()
            .push(record.clone());
        let feed = inner.feed(key, self.buffer);
        let _ = feed.send(FeedSignal::Batch(vec![record]));
    }

    /// Deliver the whole log again to every subscriber
    pub async fn redeliver(&self, key: &ConversationKey) {
        let mut inner = self.inner.write().await;
        let snapshot = inner.snapshot(key);
        let feed = inner.feed(key, self.buffer);
        let _ = feed.send(FeedSignal::Batch(snapshot));
    }

    /// Simulate the transport dropping for subscribers of `key`
    pub async fn interrupt(&self, key: &ConversationKey, reason: &str) {
        let mut inner = self.inner.write().await;
        let feed = inner.feed(key, self.buffer);
        let _ = feed.send(FeedSignal::TransportError(reason.to_string()));
    }

    /// Simulate the transport coming back
    pub async fn restore(&self, key: &ConversationKey) {
        let mut inner = self.inner.write().await;
        let feed = inner.feed(key, self.buffer);
        let _ = feed.send(FeedSignal::Recovered);
    }

    /// Live subscriptions on `key`
    pub async fn subscriber_count(&self, key: &ConversationKey) -> usize {
        self.inner
            .read()
            .await
            .feeds
            .get(key)
            .map(|feed| feed.receiver_count())
            .unwrap_or(0)
    }

    /// Number of stored records for `key`, duplicates included
    pub async fn log_len(&self, key: &ConversationKey) -> usize {
        self.inner
            .read()
            .await
            .logs
            .get(key)
            .map(|log| log.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn append_message(&self, key: &ConversationKey, message: &Message) -> Result<()> {
        self.append_raw(key, message.to_record()).await;
        Ok(())
    }

    async fn subscribe(&self, key: &ConversationKey) -> Result<mpsc::Receiver<FeedSignal>> {
        // Snapshot and broadcast registration under one lock: nothing falls in between
        let (snapshot, mut events) = {
            let mut inner = self.inner.write().await;
            let events = inner.feed(key, self.buffer).subscribe();
            (inner.snapshot(key), events)
        };

        let (tx, rx) = mpsc::channel(self.buffer);
        let inner = self.inner.clone();
        let key = key.clone();

        tokio::spawn(async move {
            if tx.send(FeedSignal::Batch(snapshot)).await.is_err() {
                return;
            }
            loop {
                // Stop as soon as the subscriber is gone, even on a quiet key
                let received = tokio::select! {
                    _ = tx.closed() => break,
                    received = events.recv() => received,
                };
                let signal = match received {
                    Ok(signal) => signal,
                    Err(RecvError::Lagged(n)) => {
                        // Missed events are recovered by resending the full log
                        warn!("Subscriber of {} lagged {} events, resyncing", key, n);
                        FeedSignal::Batch(inner.read().await.snapshot(&key))
                    }
                    Err(RecvError::Closed) => break,
                };
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
            debug!("Memory feed for {} closed", key);
        });

        Ok(rx)
    }

    async fn merge_summary(&self, summary: &ConversationSummary) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let slot = (summary.owner_id.clone(), summary.peer_id.clone());
        if let Some(stored) = inner.summaries.get(&slot) {
            if !summary.supersedes(stored) {
                return Ok(false);
            }
        }
        inner.summaries.insert(slot, summary.clone());
        Ok(true)
    }

    async fn summary(
        &self,
        owner: &ParticipantId,
        peer: &ParticipantId,
    ) -> Result<Option<ConversationSummary>> {
        let inner = self.inner.read().await;
        Ok(inner.summaries.get(&(owner.clone(), peer.clone())).cloned())
    }

    async fn summaries(&self, owner: &ParticipantId) -> Result<Vec<ConversationSummary>> {
        let inner = self.inner.read().await;
        Ok(inner
            .summaries
            .values()
            .filter(|s| &s.owner_id == owner)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::resolve;

    fn summary(owner: &str, peer: &str, text: &str, at: i64) -> ConversationSummary {
        ConversationSummary {
            owner_id: owner.into(),
            peer_id: peer.into(),
            last_message_text: text.to_string(),
            last_message_at: at,
            last_message_id: format!("{}-{}", text, at),
            conversation_key: resolve(&owner.into(), &peer.into()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_merge_summary_is_monotonic() {
        let store = MemoryStore::new();
        assert!(store.merge_summary(&summary("alice", "bob", "new", 200)).await.unwrap());
        assert!(!store.merge_summary(&summary("alice", "bob", "old", 150)).await.unwrap());

        let stored = store
            .summary(&"alice".into(), &"bob".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_message_text, "new");
        assert_eq!(stored.last_message_at, 200);
    }

    #[tokio::test]
    async fn test_subscribe_starts_with_snapshot() {
        let store = MemoryStore::new();
        let key = resolve(&"alice".into(), &"bob".into()).unwrap();
        let msg = Message {
            id: "m1".to_string(),
            text: "hi".to_string(),
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            sent_at: 1,
        };
        store.append_message(&key, &msg).await.unwrap();

        let mut rx = store.subscribe(&key).await.unwrap();
        match rx.recv().await {
            Some(FeedSignal::Batch(records)) => assert_eq!(records, vec![msg.to_record()]),
            other => panic!("expected snapshot batch, got {:?}", other),
        }

        store.interrupt(&key, "offline").await;
        assert!(matches!(rx.recv().await, Some(FeedSignal::TransportError(_))));
    }

    #[tokio::test]
    async fn test_summaries_are_per_owner() {
        let store = MemoryStore::new();
        store.merge_summary(&summary("alice", "bob", "x", 1)).await.unwrap();
        store.merge_summary(&summary("alice", "carol", "y", 2)).await.unwrap();
        store.merge_summary(&summary("bob", "alice", "x", 1)).await.unwrap();

        assert_eq!(store.summaries(&"alice".into()).await.unwrap().len(), 2);
        assert_eq!(store.summaries(&"bob".into()).await.unwrap().len(), 1);
    }
}
