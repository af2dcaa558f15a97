use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Named category of pending operations, one per domain service that supports
/// offline queuing. Doubles as the storage key under which the topic's queue
/// is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(Cow<'static, str>);

impl Topic {
    pub const fn from_static(name: &'static str) -> Self {
        Topic(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Topic(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `{action, payload}` pair a domain service hands over when a mutation
/// has to be queued for later replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpRequest {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl OpRequest {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }

    /// Build a request from a tagged action enum (`action` tag, `payload`
    /// content), so callers with typed actions never hand-write the envelope.
    pub fn typed<T: Serialize>(op: &T) -> anyhow::Result<Self> {
        let value = serde_json::to_value(op).context("failed to serialize action")?;
        serde_json::from_value(value).context("action did not produce an {action, payload} envelope")
    }
}

/// One queued mutation. Fully self-contained JSON so it can be replayed after
/// a process restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingOp {
    pub id: Uuid,
    pub topic: Topic,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingOp {
    /// Reassemble the tagged envelope and decode it into a typed action enum.
    /// Fails for actions this build does not recognize.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        let envelope = serde_json::json!({
            "action": self.action,
            "payload": self.payload,
        });
        serde_json::from_value(envelope)
            .with_context(|| format!("unrecognized action '{}'", self.action))
    }
}

/// Aggregated outcome of one synchronizer run, or of a single topic drain
/// before it is folded into the run total. Ephemeral, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncResult {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub failed_items: Vec<FailedOp>,
}

impl SyncResult {
    /// Fold one topic's drain result into the run total.
    pub fn absorb(&mut self, other: SyncResult) {
        self.total += other.total;
        self.success += other.success;
        self.failed += other.failed;
        self.failed_items.extend(other.failed_items);
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedOp {
    pub id: Uuid,
    pub topic: Topic,
    pub error: String,
}
