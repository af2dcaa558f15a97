use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Reachability signal the engine subscribes to. `true` means online. The
/// receiver only wakes on actual transitions.
pub trait ConnectivityProbe: Send + Sync {
    fn is_connected(&self) -> bool;
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Probe whose state is pushed in from outside: the mobile shell feeds it
/// platform reachability callbacks, tests drive it by hand.
#[derive(Debug)]
pub struct ManualProbe {
    tx: watch::Sender<bool>,
}

impl ManualProbe {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
    }
}

impl ConnectivityProbe for ManualProbe {
    fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Probe that decides reachability by polling a health endpoint on a fixed
/// interval. Used by the daemon binaries. Starts offline until the first
/// successful poll.
pub struct HttpProbe {
    http: Client,
    endpoint: String,
    interval: Duration,
    tx: Arc<watch::Sender<bool>>,
}

impl HttpProbe {
    pub fn new(endpoint: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("rentsync/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        let (tx, _) = watch::channel(false);
        Self {
            http,
            endpoint: endpoint.into(),
            interval,
            tx: Arc::new(tx),
        }
    }

    /// Start the poll loop. Runs for the life of the process.
    pub fn spawn(&self) -> JoinHandle<()> {
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let interval = self.interval;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                let online = match http.get(&endpoint).send().await {
                    Ok(res) => res.status().is_success(),
                    Err(err) => {
                        debug!(?err, "probe request failed");
                        false
                    }
                };
                let changed = tx.send_if_modified(|state| {
                    if *state == online {
                        false
                    } else {
                        *state = online;
                        true
                    }
                });
                if changed {
                    info!(online, "connectivity changed");
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}

impl ConnectivityProbe for HttpProbe {
    fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
