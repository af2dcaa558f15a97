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

/// Queue topic for vehicle mutations.
pub const VEHICLE_TOPIC: Topic = Topic::from_static("pending_vehicle_updates");

/// Vehicle mutations in the `{action, payload}` envelope used on the wire
/// and in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum VehicleOp {
    #[serde(rename_all = "camelCase")]
    Create { vehicle: Value },
    #[serde(rename_all = "camelCase")]
    Update { vehicle_id: String, update_data: Value },
    #[serde(rename_all = "camelCase")]
    Delete { vehicle_id: String },
}

/// Vehicle listings and mutations for the owner flows.
pub struct VehicleService {
    api: Arc<dyn RentalApi>,
    store: PendingStore,
    cache: ResponseCache,
    probe: Arc<dyn ConnectivityProbe>,
    list_ttl: Duration,
}

impl VehicleService {
    pub fn new(
        api: Arc<dyn RentalApi>,
        store: PendingStore,
        cache: ResponseCache,
        probe: Arc<dyn ConnectivityProbe>,
        list_ttl: Duration,
    ) -> Self {
        Self {
            api,
            store,
            cache,
            probe,
            list_ttl,
        }
    }

    /// Vehicle list, read through the cache. Each filter combination is
    /// cached under its own fingerprint.
    pub async fn vehicles(&self, filter: &[(&str, &str)]) -> Result<Value> {
        let key = cache::fingerprint("vehicles", filter);
        if let Some(cached) = self.cache.get(&key).await? {
            return Ok(cached);
        }
        let fresh = self.api.fetch_vehicles(filter).await?;
        self.cache.set(&key, &fresh, self.list_ttl).await?;
        Ok(fresh)
    }

    pub async fn create_vehicle(&self, vehicle: Value) -> Result<MutationOutcome> {
        self.apply_or_queue(VehicleOp::Create { vehicle }).await
    }

    pub async fn update_vehicle(
        &self,
        vehicle_id: &str,
        update_data: Value,
    ) -> Result<MutationOutcome> {
        self.apply_or_queue(VehicleOp::Update {
            vehicle_id: vehicle_id.to_string(),
            update_data,
        })
        .await
    }

    pub async fn delete_vehicle(&self, vehicle_id: &str) -> Result<MutationOutcome> {
        self.apply_or_queue(VehicleOp::Delete {
            vehicle_id: vehicle_id.to_string(),
        })
        .await
    }

    /// Run the mutation now when the probe says online, queue it when offline
    /// or when the call dies on transport. Backend rejections are returned to
    /// the caller, never queued.
    async fn apply_or_queue(&self, op: VehicleOp) -> Result<MutationOutcome> {
        if !self.probe.is_connected() {
            let id = self.store.enqueue_typed(&VEHICLE_TOPIC, &op).await?;
            info!(id = %id, "offline; vehicle mutation queued");
            return Ok(MutationOutcome::Queued(id));
        }
        match self.apply(&op).await {
            Ok(response) => Ok(MutationOutcome::Applied(response)),
            Err(err) if is_connectivity_error(&err) => {
                warn!(?err, "vehicle mutation failed on transport; queueing");
                let id = self.store.enqueue_typed(&VEHICLE_TOPIC, &op).await?;
                Ok(MutationOutcome::Queued(id))
            }
            Err(err) => Err(err),
        }
    }

    /// Send one mutation to the backend. A success invalidates the unfiltered
    /// list; filtered variants age out on their own.
    async fn apply(&self, op: &VehicleOp) -> Result<Value> {
        let response = match op {
            VehicleOp::Create { vehicle } => self.api.create_vehicle(vehicle).await?,
            VehicleOp::Update {
                vehicle_id,
                update_data,
            } => self.api.update_vehicle(vehicle_id, update_data).await?,
            VehicleOp::Delete { vehicle_id } => {
                self.api.delete_vehicle(vehicle_id).await?;
                Value::Null
            }
        };
        self.cache
            .invalidate(&cache::fingerprint("vehicles", &[]))
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl ReplayHandler for VehicleService {
    async fn replay(&self, op: &PendingOp) -> Result<Replay> {
        let decoded: VehicleOp = match op.decode() {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(?err, id = %op.id, action = %op.action, "unrecognized vehicle action");
                return Ok(Replay::Unsupported);
            }
        };
        self.apply(&decoded).await?;
        Ok(Replay::Applied)
    }
}
