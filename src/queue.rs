use crate::model::{FailedOp, OpRequest, PendingOp, SyncResult, Topic};
use crate::storage::StorageAdapter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of replaying one queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// The operation reached the backend; the entry can be removed.
    Applied,
    /// The handler does not recognize the action. The entry stays queued and
    /// counts as neither success nor failure.
    Unsupported,
}

/// Replays one queued operation against the backend. Returning an error marks
/// the item failed and keeps it queued for a later run.
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    async fn replay(&self, op: &PendingOp) -> Result<Replay>;
}

/// Per-topic FIFO queues of mutations awaiting replay, persisted as one JSON
/// array per topic through the storage adapter.
#[derive(Clone)]
pub struct PendingStore {
    storage: Arc<dyn StorageAdapter>,
    // serializes load-modify-save cycles so concurrent enqueues cannot drop
    // each other's writes
    write_lock: Arc<Mutex<()>>,
}

impl PendingStore {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load(&self, topic: &Topic) -> Result<Vec<PendingOp>> {
        let raw = self
            .storage
            .get(topic.as_str())
            .await
            .with_context(|| format!("failed to read queue for topic {topic}"))?;
        match raw {
            // A queue that fails to decode is an error, not a silent reset:
            // dropping it would lose user mutations.
            Some(json) => serde_json::from_str(&json)
                .with_context(|| format!("corrupt queue for topic {topic}")),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, topic: &Topic, ops: &[PendingOp]) -> Result<()> {
        if ops.is_empty() {
            self.storage
                .remove(topic.as_str())
                .await
                .with_context(|| format!("failed to clear queue for topic {topic}"))?;
            return Ok(());
        }
        let json = serde_json::to_string(ops).context("failed to serialize queue")?;
        self.storage
            .set(topic.as_str(), &json)
            .await
            .with_context(|| format!("failed to persist queue for topic {topic}"))?;
        Ok(())
    }

    /// Append one operation to the topic's queue. The entry is on durable
    /// storage before this returns, so a crash right after the call cannot
    /// lose it.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn enqueue(&self, topic: &Topic, request: OpRequest) -> Result<Uuid> {
        let _guard = self.write_lock.lock().await;
        let mut ops = self.load(topic).await?;
        let op = PendingOp {
            id: Uuid::new_v4(),
            topic: topic.clone(),
            action: request.action,
            payload: request.payload,
            enqueued_at: Utc::now(),
        };
        let id = op.id;
        let action = op.action.clone();
        ops.push(op);
        self.save(topic, &ops).await?;
        info!(id = %id, action, queued = ops.len(), "pending operation enqueued");
        Ok(id)
    }

    /// [`Self::enqueue`] for callers holding a typed action enum.
    pub async fn enqueue_typed<T: Serialize>(&self, topic: &Topic, op: &T) -> Result<Uuid> {
        self.enqueue(topic, OpRequest::typed(op)?).await
    }

    /// Current queue for a topic, oldest first.
    pub async fn list_pending(&self, topic: &Topic) -> Result<Vec<PendingOp>> {
        self.load(topic).await
    }

    pub async fn count_pending(&self, topic: &Topic) -> Result<usize> {
        Ok(self.load(topic).await?.len())
    }

    /// Remove one entry by id. Removing an id that is already gone is a no-op.
    #[instrument(skip_all, fields(topic = %topic, id = %id))]
    pub async fn remove(&self, topic: &Topic, id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut ops = self.load(topic).await?;
        let before = ops.len();
        ops.retain(|op| op.id != id);
        if ops.len() != before {
            self.save(topic, &ops).await?;
        }
        Ok(())
    }

    /// Drain one topic: snapshot the queue, then replay entries in enqueue
    /// order. Applied entries are removed one at a time, so a crash mid-drain
    /// leaves exactly the unprocessed remainder, and entries enqueued while
    /// the drain runs are never touched. A failing handler records the item
    /// and the drain moves on; a failing storage write aborts the drain and
    /// the remaining entries stay queued for the next run.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn process_pending(
        &self,
        topic: &Topic,
        handler: &dyn ReplayHandler,
    ) -> Result<SyncResult> {
        self.process_pending_with(topic, handler, |_| {}).await
    }

    /// [`Self::process_pending`] with a callback invoked after every entry,
    /// whatever its outcome. The synchronizer drives progress through it.
    pub async fn process_pending_with<F>(
        &self,
        topic: &Topic,
        handler: &dyn ReplayHandler,
        mut on_item: F,
    ) -> Result<SyncResult>
    where
        F: FnMut(&PendingOp),
    {
        let snapshot = self.load(topic).await?;
        let mut result = SyncResult::default();
        for op in snapshot {
            result.total += 1;
            match handler.replay(&op).await {
                Ok(Replay::Applied) => {
                    self.remove(topic, op.id).await?;
                    result.success += 1;
                    info!(id = %op.id, topic = %topic, action = %op.action, "pending operation replayed");
                }
                Ok(Replay::Unsupported) => {
                    warn!(id = %op.id, topic = %topic, action = %op.action, "unrecognized action; leaving queued");
                }
                Err(err) => {
                    warn!(?err, id = %op.id, topic = %topic, action = %op.action, "replay failed; leaving queued");
                    result.failed += 1;
                    result.failed_items.push(FailedOp {
                        id: op.id,
                        topic: topic.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
            on_item(&op);
        }
        Ok(result)
    }
}
