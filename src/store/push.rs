use super::reducer::{InitiativeOrder, PushUpdate, StoreAction};
use super::LiveInteractionStore;
use crate::types::{InteractionId, InteractionStatus, Participants, PendingAction};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One full-object replacement from a server feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Push<T> {
    pub interaction_id: InteractionId,
    pub version: Option<u64>,
    pub payload: T,
}

impl<T> Push<T> {
    pub fn new(interaction_id: impl Into<InteractionId>, payload: T) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            version: None,
            payload,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

/// Receiving ends of the four per-interaction server feeds.
pub struct InteractionFeeds {
    pub status: mpsc::Receiver<Push<InteractionStatus>>,
    pub participants: mpsc::Receiver<Push<Participants>>,
    pub initiative: mpsc::Receiver<Push<InitiativeOrder>>,
    pub pending_actions: mpsc::Receiver<Push<Vec<PendingAction>>>,
}

/// Sending ends, held by whatever bridges the server transport.
#[derive(Clone)]
pub struct PushSenders {
    pub status: mpsc::Sender<Push<InteractionStatus>>,
    pub participants: mpsc::Sender<Push<Participants>>,
    pub initiative: mpsc::Sender<Push<InitiativeOrder>>,
    pub pending_actions: mpsc::Sender<Push<Vec<PendingAction>>>,
}

impl InteractionFeeds {
    pub fn channel(buffer: usize) -> (PushSenders, InteractionFeeds) {
        let (status_tx, status) = mpsc::channel(buffer);
        let (participants_tx, participants) = mpsc::channel(buffer);
        let (initiative_tx, initiative) = mpsc::channel(buffer);
        let (pending_tx, pending_actions) = mpsc::channel(buffer);
        (
            PushSenders {
                status: status_tx,
                participants: participants_tx,
                initiative: initiative_tx,
                pending_actions: pending_tx,
            },
            InteractionFeeds {
                status,
                participants,
                initiative,
                pending_actions,
            },
        )
    }
}

/// Background task feeding one interaction's pushes into the store.
/// Dropping it aborts the task.
pub struct PushConsumer {
    interaction_id: InteractionId,
    handle: JoinHandle<()>,
}

impl PushConsumer {
    /// Must be called from within a tokio runtime.
    pub fn attach(
        store: Arc<LiveInteractionStore>,
        interaction_id: InteractionId,
        feeds: InteractionFeeds,
    ) -> Self {
        let id = interaction_id.clone();
        let handle = tokio::spawn(consume(store, id, feeds));
        Self {
            interaction_id,
            handle,
        }
    }

    pub fn interaction_id(&self) -> &str {
        &self.interaction_id
    }

    /// True once every feed has closed or the task was aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PushConsumer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn consume(
    store: Arc<LiveInteractionStore>,
    interaction_id: InteractionId,
    feeds: InteractionFeeds,
) {
    let InteractionFeeds {
        mut status,
        mut participants,
        mut initiative,
        mut pending_actions,
    } = feeds;

    tracing::info!("[PUSH {}] consumer started", interaction_id);
    loop {
        let (target, version, update) = tokio::select! {
            Some(p) = status.recv() => (p.interaction_id, p.version, PushUpdate::Status(p.payload)),
            Some(p) = participants.recv() => (p.interaction_id, p.version, PushUpdate::Participants(p.payload)),
            Some(p) = initiative.recv() => (p.interaction_id, p.version, PushUpdate::Initiative(p.payload)),
            Some(p) = pending_actions.recv() => (p.interaction_id, p.version, PushUpdate::PendingActions(p.payload)),
            else => break,
        };

        if target != interaction_id {
            tracing::debug!(
                "[PUSH {}] ignoring {} push for {}",
                interaction_id,
                update.feed_name(),
                target
            );
            continue;
        }

        let feed = update.feed_name();
        let applied = store.dispatch(StoreAction::Push {
            interaction_id: target,
            update,
            version,
            received_at: Utc::now(),
        });
        tracing::debug!(
            "[PUSH {}] {} push applied={} version={:?}",
            interaction_id,
            feed,
            applied,
            version
        );
    }
    tracing::info!("[PUSH {}] all feeds closed", interaction_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_consumer_applies_matching_pushes() {
        let store = LiveInteractionStore::new();
        let (tx, feeds) = InteractionFeeds::channel(8);
        let consumer = store.switch_interaction("I1", None, feeds);

        tx.status
            .send(Push::new("I1", InteractionStatus::InProgress))
            .await
            .unwrap();
        tx.participants
            .send(Push::new(
                "OTHER",
                Participants {
                    npc_ids: vec!["n1".into()],
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        settle().await;

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.status, InteractionStatus::InProgress);
        assert!(snap.participants.is_empty());
        assert_eq!(consumer.interaction_id(), "I1");
    }

    #[tokio::test]
    async fn test_consumer_finishes_when_feeds_close() {
        let store = LiveInteractionStore::new();
        let (tx, feeds) = InteractionFeeds::channel(1);
        let consumer = store.switch_interaction("I1", None, feeds);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), async {
            while !consumer.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_consuming() {
        let store = LiveInteractionStore::new();
        let (tx, feeds) = InteractionFeeds::channel(8);
        let consumer = store.switch_interaction("I1", None, feeds);
        drop(consumer);
        settle().await;

        // the receiver went away with the aborted task
        assert!(tx
            .status
            .send(Push::new("I1", InteractionStatus::Paused))
            .await
            .is_err());
        assert!(store.snapshot().is_none());
    }
}
