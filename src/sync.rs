use crate::model::{SyncResult, Topic};
use crate::queue::{PendingStore, ReplayHandler};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Topic to replay-handler table. Drain order is registration order.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    entries: Vec<(Topic, Arc<dyn ReplayHandler>)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic: Topic, handler: Arc<dyn ReplayHandler>) {
        self.entries.push((topic, handler));
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.entries.iter().map(|(topic, _)| topic)
    }

    fn entries(&self) -> &[(Topic, Arc<dyn ReplayHandler>)] {
        &self.entries
    }
}

/// Drains every registered topic that has queued operations. At most one run
/// is in flight at a time; requests arriving during a run are dropped, not
/// queued up behind it.
pub struct Synchronizer {
    store: PendingStore,
    registry: HandlerRegistry,
    in_flight: AtomicBool,
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Synchronizer {
    pub fn new(store: PendingStore, registry: HandlerRegistry) -> Self {
        Self {
            store,
            registry,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queued-operation count across every registered topic.
    pub async fn pending_total(&self) -> Result<usize> {
        let counts = futures::future::try_join_all(
            self.registry
                .topics()
                .map(|topic| self.store.count_pending(topic)),
        )
        .await?;
        Ok(counts.into_iter().sum())
    }

    pub async fn run(&self) -> Option<SyncResult> {
        self.run_with(|_| {}).await
    }

    /// One full pass over the queues. `on_progress` sees 0 once the run owns
    /// the flag, a percentage after every replayed entry, and always 100 at
    /// the end. Returns `None` when another run was already active.
    #[instrument(skip_all)]
    pub async fn run_with<F>(&self, mut on_progress: F) -> Option<SyncResult>
    where
        F: FnMut(u8),
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already running; request dropped");
            return None;
        }
        let _flight = FlightGuard(&self.in_flight);

        on_progress(0);

        // Count the whole run up front so progress is a fraction of it.
        let mut topics = Vec::new();
        let mut total = 0usize;
        for (topic, handler) in self.registry.entries() {
            match self.store.count_pending(topic).await {
                Ok(0) => {}
                Ok(count) => {
                    total += count;
                    topics.push((topic, handler));
                }
                Err(err) => {
                    error!(?err, topic = %topic, "queue unreadable; skipping topic");
                }
            }
        }

        let mut overall = SyncResult::default();
        let mut processed = 0usize;
        for (topic, handler) in topics {
            let drained = self
                .store
                .process_pending_with(topic, handler.as_ref(), |_| {
                    processed += 1;
                    on_progress(progress_pct(processed, total));
                })
                .await;
            match drained {
                Ok(result) => overall.absorb(result),
                Err(err) => {
                    error!(?err, topic = %topic, "topic drain aborted; entries stay queued");
                }
            }
        }

        on_progress(100);
        info!(
            total = overall.total,
            success = overall.success,
            failed = overall.failed,
            "sync run finished"
        );
        Some(overall)
    }
}

fn progress_pct(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed * 100 + total / 2) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OpRequest, PendingOp, Topic};
    use crate::queue::Replay;
    use crate::storage::{MemoryStorage, StorageAdapter, StorageError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Mutex;

    const VEHICLES: Topic = Topic::from_static("pending_vehicle_updates");
    const PROFILE: Topic = Topic::from_static("pending_profile_updates");

    struct CountingHandler {
        calls: AtomicUsize,
        delay: Option<Duration>,
        fail_on: Vec<&'static str>,
        order: Arc<Mutex<Vec<String>>>,
    }

    impl CountingHandler {
        fn new(order: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: None,
                fail_on: vec![],
                order,
            }
        }

        fn plain() -> Self {
            Self::new(Arc::new(Mutex::new(vec![])))
        }
    }

    #[async_trait]
    impl ReplayHandler for CountingHandler {
        async fn replay(&self, op: &PendingOp) -> anyhow::Result<Replay> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().await.push(format!("{}:{}", op.topic, op.action));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on.contains(&op.action.as_str()) {
                anyhow::bail!("scripted failure");
            }
            Ok(Replay::Applied)
        }
    }

    fn store() -> PendingStore {
        PendingStore::new(Arc::new(MemoryStorage::new()))
    }

    async fn fill(store: &PendingStore, topic: &Topic, actions: &[&str]) {
        for action in actions {
            store
                .enqueue(topic, OpRequest::new(*action, json!({})))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let store = store();
        fill(&store, &VEHICLES, &["update", "update", "delete"]).await;
        fill(&store, &PROFILE, &["updateProfile"]).await;

        let mut registry = HandlerRegistry::new();
        registry.register(VEHICLES, Arc::new(CountingHandler::plain()));
        registry.register(PROFILE, Arc::new(CountingHandler::plain()));
        let sync = Synchronizer::new(store, registry);

        let mut seen = Vec::new();
        let result = sync.run_with(|p| seen.push(p)).await.unwrap();

        assert_eq!(result.total, 4);
        assert_eq!(result.success, 4);
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        // one tick per entry plus the start and end marks
        assert_eq!(seen.len(), 6);
    }

    #[tokio::test]
    async fn topics_drain_in_registration_order() {
        let store = store();
        fill(&store, &VEHICLES, &["update", "delete"]).await;
        fill(&store, &PROFILE, &["updateProfile"]).await;

        let order = Arc::new(Mutex::new(vec![]));
        let mut registry = HandlerRegistry::new();
        registry.register(VEHICLES, Arc::new(CountingHandler::new(order.clone())));
        registry.register(PROFILE, Arc::new(CountingHandler::new(order.clone())));
        let sync = Synchronizer::new(store, registry);

        sync.run().await.unwrap();

        let seen = order.lock().await.clone();
        assert_eq!(
            seen,
            vec![
                "pending_vehicle_updates:update",
                "pending_vehicle_updates:delete",
                "pending_profile_updates:updateProfile",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_run_is_dropped_not_queued() {
        let store = store();
        fill(&store, &VEHICLES, &["update", "update"]).await;

        let handler = Arc::new(CountingHandler {
            delay: Some(Duration::from_millis(50)),
            ..CountingHandler::plain()
        });
        let mut registry = HandlerRegistry::new();
        registry.register(VEHICLES, handler.clone());
        let sync = Arc::new(Synchronizer::new(store, registry));

        let first = sync.clone();
        let second = sync.clone();
        let (a, b) = tokio::join!(first.run(), async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            second.run().await
        });

        let result = a.expect("first run completes");
        assert_eq!(result.success, 2);
        assert!(b.is_none(), "second request must be dropped");
        // every entry was replayed exactly once
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        // the flag is released, a later run works again
        assert!(!sync.is_syncing());
        assert!(sync.run().await.is_some());
    }

    #[tokio::test]
    async fn aggregates_failures_across_topics() {
        let store = store();
        fill(&store, &VEHICLES, &["update", "delete"]).await;
        fill(&store, &PROFILE, &["updateProfile"]).await;

        let mut registry = HandlerRegistry::new();
        registry.register(
            VEHICLES,
            Arc::new(CountingHandler {
                fail_on: vec!["delete"],
                ..CountingHandler::plain()
            }),
        );
        registry.register(PROFILE, Arc::new(CountingHandler::plain()));
        let sync = Synchronizer::new(store.clone(), registry);

        let result = sync.run().await.unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.success, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failed_items[0].topic, VEHICLES);
        assert_eq!(store.count_pending(&VEHICLES).await.unwrap(), 1);
        assert_eq!(store.count_pending(&PROFILE).await.unwrap(), 0);
    }

    struct TopicFailingStorage {
        inner: MemoryStorage,
        fail_key: &'static str,
    }

    #[async_trait]
    impl StorageAdapter for TopicFailingStorage {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            if key == self.fail_key {
                return Err(StorageError::Backend("read failed".into()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn unreadable_topic_does_not_sink_the_run() {
        let storage = Arc::new(TopicFailingStorage {
            inner: MemoryStorage::new(),
            fail_key: "pending_profile_updates",
        });
        let store = PendingStore::new(storage);
        fill(&store, &VEHICLES, &["update"]).await;

        let mut registry = HandlerRegistry::new();
        registry.register(VEHICLES, Arc::new(CountingHandler::plain()));
        registry.register(PROFILE, Arc::new(CountingHandler::plain()));
        let sync = Synchronizer::new(store, registry);

        let mut seen = Vec::new();
        let result = sync.run_with(|p| seen.push(p)).await.unwrap();

        assert_eq!(result.success, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn empty_queues_still_report_a_complete_run() {
        let mut registry = HandlerRegistry::new();
        registry.register(VEHICLES, Arc::new(CountingHandler::plain()));
        let sync = Synchronizer::new(store(), registry);

        let mut seen = Vec::new();
        let result = sync.run_with(|p| seen.push(p)).await.unwrap();

        assert_eq!(result, SyncResult::default());
        assert_eq!(seen, vec![0, 100]);
    }

    #[tokio::test]
    async fn pending_total_sums_registered_topics() {
        let store = store();
        fill(&store, &VEHICLES, &["update", "update"]).await;
        fill(&store, &PROFILE, &["updateProfile"]).await;

        let mut registry = HandlerRegistry::new();
        registry.register(VEHICLES, Arc::new(CountingHandler::plain()));
        registry.register(PROFILE, Arc::new(CountingHandler::plain()));
        let sync = Synchronizer::new(store, registry);

        assert_eq!(sync.pending_total().await.unwrap(), 3);
    }
}
