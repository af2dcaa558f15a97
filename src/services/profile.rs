use super::{is_connectivity_error, MutationOutcome};
use crate::api::RentalApi;
use crate::cache::{self, ResponseCache};
use crate::model::{PendingOp, Topic};
use crate::probe::ConnectivityProbe;
use crate::queue::{PendingStore, Replay, ReplayHandler};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Queue topic for profile mutations.
pub const PROFILE_TOPIC: Topic = Topic::from_static("pending_profile_updates");

/// Profile mutations in the `{action, payload}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum ProfileOp {
    #[serde(rename_all = "camelCase")]
    UpdateProfile { profile_data: Value },
    #[serde(rename_all = "camelCase")]
    UploadDocument { doc_type: String, document: Value },
}

/// Renter profile reads and mutations.
pub struct ProfileService {
    api: Arc<dyn RentalApi>,
    store: PendingStore,
    cache: ResponseCache,
    probe: Arc<dyn ConnectivityProbe>,
    profile_ttl: Duration,
}

impl ProfileService {
    pub fn new(
        api: Arc<dyn RentalApi>,
        store: PendingStore,
        cache: ResponseCache,
        probe: Arc<dyn ConnectivityProbe>,
        profile_ttl: Duration,
    ) -> Self {
        Self {
            api,
            store,
            cache,
            probe,
            profile_ttl,
        }
    }

    /// Current profile, read through the cache.
    pub async fn profile(&self) -> Result<Value> {
        let key = cache::fingerprint("profile", &[]);
        if let Some(cached) = self.cache.get(&key).await? {
            return Ok(cached);
        }
        let fresh = self.api.fetch_profile().await?;
        self.cache.set(&key, &fresh, self.profile_ttl).await?;
        Ok(fresh)
    }

    pub async fn update_profile(&self, profile_data: Value) -> Result<MutationOutcome> {
        self.apply_or_queue(ProfileOp::UpdateProfile { profile_data })
            .await
    }

    pub async fn upload_document(
        &self,
        doc_type: &str,
        document: Value,
    ) -> Result<MutationOutcome> {
        self.apply_or_queue(ProfileOp::UploadDocument {
            doc_type: doc_type.to_string(),
            document,
        })
        .await
    }

    async fn apply_or_queue(&self, op: ProfileOp) -> Result<MutationOutcome> {
        if !self.probe.is_connected() {
            let id = self.store.enqueue_typed(&PROFILE_TOPIC, &op).await?;
            info!(id = %id, "offline; profile mutation queued");
            return Ok(MutationOutcome::Queued(id));
        }
        match self.apply(&op).await {
            Ok(response) => Ok(MutationOutcome::Applied(response)),
            Err(err) if is_connectivity_error(&err) => {
                warn!(?err, "profile mutation failed on transport; queueing");
                let id = self.store.enqueue_typed(&PROFILE_TOPIC, &op).await?;
                Ok(MutationOutcome::Queued(id))
            }
            Err(err) => Err(err),
        }
    }

    async fn apply(&self, op: &ProfileOp) -> Result<Value> {
        let response = match op {
            ProfileOp::UpdateProfile { profile_data } => {
                self.api.update_profile(profile_data).await?
            }
            ProfileOp::UploadDocument { doc_type, document } => {
                self.api.upload_document(doc_type, document).await?
            }
        };
        self.cache
            .invalidate(&cache::fingerprint("profile", &[]))
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl ReplayHandler for ProfileService {
    async fn replay(&self, op: &PendingOp) -> Result<Replay> {
        let decoded: ProfileOp = match op.decode() {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(?err, id = %op.id, action = %op.action, "unrecognized profile action");
                return Ok(Replay::Unsupported);
            }
        };
        self.apply(&decoded).await?;
        Ok(Replay::Applied)
    }
}
