/// Ordered view of one conversation built from an at-least-once, unordered
/// change feed.
use crate::conversation::ConversationKey;
use crate::error::Result;
use crate::messenger_types::{FeedSignal, FeedState, FeedView, Message, MessageRecord};
use crate::store::RemoteStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error reason published when the store ends a subscription
pub const FEED_CLOSED: &str = "feed closed";

/// Pure reducer over the retained message set of a conversation.
///
/// Merging is keyed by message id, so applying the same batch twice or two
/// batches in either order yields the same visible sequence.
#[derive(Debug, Default)]
pub struct ConversationFeed {
    state: FeedState,
    retained: HashMap<String, Message>,
    /// Records that failed to parse, kept until a corrected copy arrives
    unparsed: HashMap<String, MessageRecord>,
    visible: Vec<Message>,
}

impl ConversationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    /// Messages ordered by `sent_at`, ties broken by id
    pub fn messages(&self) -> &[Message] {
        &self.visible
    }

    pub fn unparsed_count(&self) -> usize {
        self.unparsed.len()
    }

    pub fn view(&self) -> FeedView {
        FeedView {
            state: self.state.clone(),
            messages: self.visible.clone(),
        }
    }

    /// Uninitialized -> Syncing
    pub fn begin_sync(&mut self) {
        self.state = FeedState::Syncing;
    }

    /// Feed one signal from the transport through the state machine
    pub fn handle(&mut self, signal: FeedSignal) {
        match signal {
            FeedSignal::Batch(records) => self.apply_batch(records),
            FeedSignal::TransportError(reason) => {
                warn!("Conversation feed transport error: {}", reason);
                self.state = FeedState::Error(reason);
            }
            FeedSignal::Recovered => {
                if matches!(self.state, FeedState::Error(_)) {
                    info!("Conversation feed transport recovered");
                    self.state = FeedState::Syncing;
                }
            }
        }
    }

    /// Merge a batch of records and re-derive the visible sequence.
    pub fn apply_batch(&mut self, records: Vec<MessageRecord>) {
        let total = records.len();
        let mut dropped = 0;

        for record in records {
            match record.parse() {
                Ok(message) => {
                    self.unparsed.remove(&message.id);
                    self.retained.insert(message.id.clone(), message);
                }
                Err(reason) => {
                    // A bad re-delivery never hides a message we already parsed
                    if self.retained.contains_key(&record.id) {
                        continue;
                    }
                    debug!("Dropping malformed record {}: {:?}", record.id, reason);
                    dropped += 1;
                    self.unparsed.insert(record.id.clone(), record);
                }
            }
        }

        if dropped > 0 {
            warn!("Dropped {} of {} records from batch", dropped, total);
        }

        self.rebuild();

        // A batch arriving while in Error means the transport is delivering again
        self.state = FeedState::Synced;
    }

    /// Release all held message state
    pub fn reset(&mut self) {
        self.retained.clear();
        self.unparsed.clear();
        self.visible.clear();
        self.state = FeedState::Uninitialized;
    }

    fn rebuild(&mut self) {
        let mut visible: Vec<Message> = self.retained.values().cloned().collect();
        visible.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        self.visible = visible;
    }
}

/// Live subscription to one conversation.
///
/// Dropping it or calling `unsubscribe` stops the driver task; no view is
/// observable through this handle afterwards.
pub struct FeedSubscription {
    key: ConversationKey,
    view: watch::Receiver<FeedView>,
    task: JoinHandle<()>,
}

impl FeedSubscription {
    /// Subscribe to `key` on `store` and start reducing its signals.
    pub async fn start(store: Arc<dyn RemoteStore>, key: ConversationKey) -> Result<Self> {
        let signals = store.subscribe(&key).await?;

        let mut feed = ConversationFeed::new();
        feed.begin_sync();
        let (tx, view) = watch::channel(feed.view());

        info!("Subscribed to conversation {}", key);
        let task = tokio::spawn(drive(feed, signals, tx, key.clone()));

        Ok(Self { key, view, task })
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Latest self-consistent view
    pub fn current(&self) -> FeedView {
        self.view.borrow().clone()
    }

    /// Wait for the next view update. Returns `None` once the feed ended.
    pub async fn changed(&mut self) -> Option<FeedView> {
        self.view.changed().await.ok()?;
        Some(self.view.borrow_and_update().clone())
    }

    /// Wait until the view satisfies `pred`. Returns `None` if the feed ended first.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&FeedView) -> bool) -> Option<FeedView> {
        let view = self.view.wait_for(|v| pred(v)).await.ok()?;
        Some(view.clone())
    }

    /// Tear down the subscription and release the held messages
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.task.abort();
        debug!("Unsubscribed from conversation {}", self.key);
    }
}

async fn drive(
    mut feed: ConversationFeed,
    mut signals: mpsc::Receiver<FeedSignal>,
    tx: watch::Sender<FeedView>,
    key: ConversationKey,
) {
    while let Some(signal) = signals.recv().await {
        feed.handle(signal);
        debug!(
            "Conversation {} now {:?} with {} messages",
            key,
            feed.state(),
            feed.messages().len()
        );
        if tx.send(feed.view()).is_err() {
            break;
        }
    }
    // The store stopped delivering; the last view must not pass for live
    let _ = tx.send(FeedView {
        state: FeedState::Error(FEED_CLOSED.to_string()),
        messages: feed.messages().to_vec(),
    });
    feed.reset();
    debug!("Feed driver for {} stopped", key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, sent_at: i64) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            text: Some(format!("text {}", id)),
            sender_id: Some("alice".into()),
            receiver_id: Some("bob".into()),
            sent_at: Some(sent_at),
        }
    }

    fn ids(feed: &ConversationFeed) -> Vec<&str> {
        feed.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_state_transitions() {
        let mut feed = ConversationFeed::new();
        assert_eq!(feed.state(), &FeedState::Uninitialized);

        feed.begin_sync();
        assert_eq!(feed.state(), &FeedState::Syncing);

        feed.handle(FeedSignal::Batch(vec![]));
        assert_eq!(feed.state(), &FeedState::Synced);

        feed.handle(FeedSignal::TransportError("offline".to_string()));
        assert_eq!(feed.state(), &FeedState::Error("offline".to_string()));

        feed.handle(FeedSignal::Recovered);
        assert_eq!(feed.state(), &FeedState::Syncing);

        feed.handle(FeedSignal::Batch(vec![rec("m1", 1)]));
        assert_eq!(feed.state(), &FeedState::Synced);
    }

    #[test]
    fn test_recovered_without_error_is_ignored() {
        let mut feed = ConversationFeed::new();
        feed.begin_sync();
        feed.handle(FeedSignal::Batch(vec![]));
        feed.handle(FeedSignal::Recovered);
        assert_eq!(feed.state(), &FeedState::Synced);
    }

    #[test]
    fn test_error_keeps_messages() {
        let mut feed = ConversationFeed::new();
        feed.apply_batch(vec![rec("m1", 1)]);
        feed.handle(FeedSignal::TransportError("reset".to_string()));
        assert_eq!(ids(&feed), vec!["m1"]);
    }

    #[test]
    fn test_orders_by_time_then_id() {
        let mut feed = ConversationFeed::new();
        feed.apply_batch(vec![rec("m3", 50), rec("m2", 100), rec("m1", 100)]);
        assert_eq!(ids(&feed), vec!["m3", "m1", "m2"]);
    }

    #[test]
    fn test_same_batch_twice_is_idempotent() {
        let batch = vec![rec("a", 3), rec("b", 1), rec("c", 2)];
        let mut feed = ConversationFeed::new();
        feed.apply_batch(batch.clone());
        let once = feed.messages().to_vec();
        feed.apply_batch(batch);
        assert_eq!(feed.messages(), once.as_slice());
        assert_eq!(feed.messages().len(), 3);
    }

    #[test]
    fn test_batch_order_is_commutative() {
        let first = vec![rec("a", 3), rec("b", 1)];
        let second = vec![rec("c", 2), rec("b", 1), rec("d", 3)];

        let mut forward = ConversationFeed::new();
        forward.apply_batch(first.clone());
        forward.apply_batch(second.clone());

        let mut reverse = ConversationFeed::new();
        reverse.apply_batch(second);
        reverse.apply_batch(first);

        assert_eq!(forward.messages(), reverse.messages());
        assert_eq!(ids(&forward), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_malformed_record_is_retained_for_repair() {
        let mut broken = rec("m2", 20);
        broken.text = None;

        let mut feed = ConversationFeed::new();
        feed.apply_batch(vec![rec("m1", 10), broken]);
        assert_eq!(ids(&feed), vec!["m1"]);
        assert_eq!(feed.unparsed_count(), 1);
        assert_eq!(feed.state(), &FeedState::Synced);

        feed.apply_batch(vec![rec("m2", 20)]);
        assert_eq!(ids(&feed), vec!["m1", "m2"]);
        assert_eq!(feed.unparsed_count(), 0);
    }

    #[test]
    fn test_malformed_redelivery_does_not_hide_message() {
        let mut broken = rec("m1", 10);
        broken.sender_id = None;

        let mut feed = ConversationFeed::new();
        feed.apply_batch(vec![rec("m1", 10)]);
        feed.apply_batch(vec![broken]);
        assert_eq!(ids(&feed), vec!["m1"]);
        assert_eq!(feed.unparsed_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_store_feed_publishes_error() {
        let (signals_tx, signals) = mpsc::channel(4);
        let mut feed = ConversationFeed::new();
        feed.begin_sync();
        let (tx, mut view) = watch::channel(feed.view());

        signals_tx.send(FeedSignal::Batch(vec![rec("m1", 10)])).await.unwrap();
        drop(signals_tx);
        let key = crate::conversation::resolve(&"alice".into(), &"bob".into()).unwrap();
        drive(feed, signals, tx, key).await;

        let last = view.borrow_and_update().clone();
        assert_eq!(last.state, FeedState::Error(FEED_CLOSED.to_string()));
        assert_eq!(last.messages.len(), 1);
    }

    #[test]
    fn test_reset_releases_state() {
        let mut feed = ConversationFeed::new();
        feed.apply_batch(vec![rec("m1", 10)]);
        feed.reset();
        assert!(feed.messages().is_empty());
        assert_eq!(feed.state(), &FeedState::Uninitialized);
    }
}
