use crate::model::SyncResult;
use crate::probe::ConnectivityProbe;
use crate::sync::Synchronizer;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Connectivity snapshot the UI renders from. Published as whole values over
/// a watch channel; consumers never observe a half-updated state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityState {
    pub is_online: bool,
    /// Sticky marker that an offline window happened. Cleared only after a
    /// fully clean sync leaves nothing queued.
    pub was_offline: bool,
    pub pending_ops: usize,
    pub is_syncing: bool,
    pub sync_progress: u8,
    pub last_sync: Option<SyncResult>,
}

impl ConnectivityState {
    fn initial(is_online: bool) -> Self {
        Self {
            is_online,
            was_offline: !is_online,
            pending_ops: 0,
            is_syncing: false,
            sync_progress: 0,
            last_sync: None,
        }
    }

    pub fn has_pending_operations(&self) -> bool {
        self.pending_ops > 0
    }

    /// Banner the UI should show for this snapshot. Offline wins over
    /// everything, an active sync over the pending reminder.
    pub fn banner(&self) -> Banner {
        if !self.is_online {
            return Banner::Offline;
        }
        if self.is_syncing {
            return Banner::Syncing {
                progress: self.sync_progress,
            };
        }
        if self.was_offline && self.pending_ops > 0 {
            return Banner::PendingSync {
                pending: self.pending_ops,
                failed: self.last_sync.as_ref().map(|r| r.failed).unwrap_or(0),
            };
        }
        if self.was_offline {
            return Banner::Restored;
        }
        Banner::Hidden
    }
}

/// Top-of-screen banner, with the product's Turkish copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Banner {
    Hidden,
    Offline,
    PendingSync { pending: usize, failed: usize },
    Syncing { progress: u8 },
    Restored,
}

impl fmt::Display for Banner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Banner::Hidden => Ok(()),
            Banner::Offline => f.write_str("Bağlantı yok"),
            Banner::PendingSync { pending, failed } => {
                write!(f, "Bekleyen işlemler var ({pending})")?;
                if *failed > 0 {
                    write!(f, " · Başarısız: {failed}")?;
                }
                Ok(())
            }
            Banner::Syncing { progress } => write!(f, "Senkronize ediliyor %{progress}"),
            Banner::Restored => f.write_str("Bağlantı geri geldi"),
        }
    }
}

/// Owns connectivity for the process: bridges the probe to the synchronizer,
/// publishes state snapshots, and exposes the manual sync entry point. Cheap
/// to clone; clones share one state.
#[derive(Clone)]
pub struct ConnectivityContext {
    inner: Arc<Inner>,
}

struct Inner {
    probe: Arc<dyn ConnectivityProbe>,
    sync: Synchronizer,
    state_tx: watch::Sender<ConnectivityState>,
    restored_banner: Duration,
}

impl ConnectivityContext {
    /// Build the context from its collaborators and take the first probe
    /// reading. A session that opens offline, or with operations left queued
    /// by an earlier process, starts with `was_offline` set so the recovery
    /// banners survive a restart.
    pub async fn new(
        probe: Arc<dyn ConnectivityProbe>,
        sync: Synchronizer,
        restored_banner: Duration,
    ) -> Self {
        let mut state = ConnectivityState::initial(probe.is_connected());
        match sync.pending_total().await {
            Ok(pending) => {
                state.pending_ops = pending;
                if pending > 0 {
                    state.was_offline = true;
                }
            }
            Err(err) => warn!(?err, "could not count queued operations at startup"),
        }
        let (state_tx, _) = watch::channel(state);
        Self {
            inner: Arc::new(Inner {
                probe,
                sync,
                state_tx,
                restored_banner,
            }),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online
    }

    pub fn was_offline(&self) -> bool {
        self.state().was_offline
    }

    pub fn is_syncing(&self) -> bool {
        self.state().is_syncing
    }

    pub fn sync_progress(&self) -> u8 {
        self.state().sync_progress
    }

    pub fn has_pending_operations(&self) -> bool {
        self.state().has_pending_operations()
    }

    pub fn last_sync(&self) -> Option<SyncResult> {
        self.state().last_sync
    }

    /// Recount the persisted queues and publish the fresh number. The shell
    /// calls this after enqueuing so the badge is live, not cached.
    pub async fn refresh_pending(&self) -> usize {
        match self.inner.sync.pending_total().await {
            Ok(pending) => {
                self.update_state(|state| state.pending_ops = pending);
                pending
            }
            Err(err) => {
                warn!(?err, "could not recount pending operations");
                self.state().pending_ops
            }
        }
    }

    fn update_state<F>(&self, apply: F)
    where
        F: FnOnce(&mut ConnectivityState),
    {
        self.inner.state_tx.send_modify(apply);
    }

    /// Drain all queued operations now. Returns `None` without touching state
    /// when offline or when another run is already active. Failures do not
    /// surface as errors here; they land in the published state.
    #[instrument(skip_all)]
    pub async fn sync_offline_data(&self) -> Option<SyncResult> {
        if !self.inner.probe.is_connected() {
            debug!("offline; sync request ignored");
            return None;
        }

        let progress_ctx = self.clone();
        let result = self
            .inner
            .sync
            .run_with(move |progress| {
                progress_ctx.update_state(|state| {
                    state.is_syncing = true;
                    state.sync_progress = progress;
                });
            })
            .await?;

        let pending = match self.inner.sync.pending_total().await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(?err, "could not recount queue after sync");
                result.total - result.success
            }
        };

        let clean = !result.has_failures();
        self.update_state(|state| {
            state.is_syncing = false;
            state.sync_progress = 100;
            state.pending_ops = pending;
            state.last_sync = Some(result.clone());
            if !clean {
                state.was_offline = true;
            }
        });
        info!(
            success = result.success,
            failed = result.failed,
            pending,
            "offline data synchronized"
        );

        if clean && pending == 0 {
            self.schedule_restored_clear();
        }
        Some(result)
    }

    /// Let the restored banner sit for its configured moment, then clear the
    /// offline marker if nothing regressed meanwhile.
    fn schedule_restored_clear(&self) {
        let ctx = self.clone();
        let delay = self.inner.restored_banner;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            ctx.inner.state_tx.send_if_modified(|state| {
                if state.was_offline
                    && state.is_online
                    && !state.is_syncing
                    && state.pending_ops == 0
                {
                    state.was_offline = false;
                    true
                } else {
                    false
                }
            });
        });
    }

    /// Follow probe transitions for the life of the process: going offline
    /// flips the banner immediately, reconnecting kicks off an automatic sync.
    pub fn spawn_watcher(&self) -> JoinHandle<()> {
        let ctx = self.clone();
        // Subscribe before spawning: a transition published between this call
        // and the task's first poll must still be delivered.
        let mut probe_rx = self.inner.probe.subscribe();
        tokio::spawn(async move {
            loop {
                if probe_rx.changed().await.is_err() {
                    debug!("probe dropped; connectivity watcher stopping");
                    break;
                }
                let online = *probe_rx.borrow_and_update();
                if online {
                    ctx.handle_reconnect().await;
                } else {
                    ctx.handle_offline();
                }
            }
        })
    }

    fn handle_offline(&self) {
        info!("connection lost");
        self.update_state(|state| {
            state.is_online = false;
            state.was_offline = true;
        });
    }

    async fn handle_reconnect(&self) {
        let pending = match self.inner.sync.pending_total().await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(?err, "could not count queue on reconnect");
                0
            }
        };
        info!(pending, "connection restored; starting sync");
        self.update_state(|state| {
            state.is_online = true;
            state.pending_ops = pending;
        });
        self.sync_offline_data().await;
    }
}
