//! Domain services with offline support: mutations run online-first and fall
//! back to the pending queue, reads go through the response cache, and each
//! service doubles as the replay handler for its own topic.

use anyhow::Error;
use serde_json::Value;
use uuid::Uuid;

pub mod profile;
pub mod vehicles;

pub use profile::{ProfileOp, ProfileService, PROFILE_TOPIC};
pub use vehicles::{VehicleOp, VehicleService, VEHICLE_TOPIC};

/// What became of a mutation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The backend applied it; the response body is attached.
    Applied(Value),
    /// Connectivity was missing or died mid-call; the operation now sits in
    /// the pending queue under the returned id.
    Queued(Uuid),
}

impl MutationOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, MutationOutcome::Queued(_))
    }
}

/// True when the error chain bottoms out in a transport-level failure,
/// meaning the backend was unreachable rather than rejecting the call.
pub fn is_connectivity_error(err: &Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|e| e.is_connect() || e.is_timeout())
            .unwrap_or(false)
    })
}
