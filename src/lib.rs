//! Offline-first mutation queue and synchronization engine for the RentGo
//! mobile client.
//!
//! Mutations attempted without connectivity land in per-topic FIFO queues on
//! device storage and are replayed in order once the connection returns.
//! Reads go through a TTL cache over the same storage. A connectivity
//! context ties the pieces together and publishes banner-ready state
//! snapshots for the UI.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod model;
pub mod probe;
pub mod queue;
pub mod services;
pub mod storage;
pub mod sync;

pub use api::{HttpRentalApi, RentalApi};
pub use cache::ResponseCache;
pub use context::{Banner, ConnectivityContext, ConnectivityState};
pub use model::{FailedOp, OpRequest, PendingOp, SyncResult, Topic};
pub use probe::{ConnectivityProbe, HttpProbe, ManualProbe};
pub use queue::{PendingStore, Replay, ReplayHandler};
pub use services::{
    MutationOutcome, ProfileOp, ProfileService, VehicleOp, VehicleService, PROFILE_TOPIC,
    VEHICLE_TOPIC,
};
pub use storage::{MemoryStorage, SqliteStorage, StorageAdapter, StorageError};
pub use sync::{HandlerRegistry, Synchronizer};
