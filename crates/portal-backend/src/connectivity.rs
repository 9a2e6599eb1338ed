//! Backend reachability tracking with debounced probing.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use portal_core::{ConnectionStatus, RawError, Reachability, ResilienceConfig};
use reqwest::Client;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::service::BackendService;

/// One reachability check against one endpoint.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self) -> Result<(), RawError>;
}

/// Probe that asks the backend service itself.
pub struct BackendProbe {
    backend: Arc<dyn BackendService>,
}

impl BackendProbe {
    pub fn new(backend: Arc<dyn BackendService>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ReachabilityProbe for BackendProbe {
    fn name(&self) -> &str {
        "backend"
    }

    async fn probe(&self) -> Result<(), RawError> {
        let cancel = CancellationToken::new();
        let _abort_on_drop = cancel.clone().drop_guard();
        self.backend.health_check(cancel).await
    }
}

/// `HEAD` request against a general-purpose endpoint.
pub struct HttpProbe {
    name: String,
    url: Url,
    client: Client,
}

impl HttpProbe {
    pub fn new(client: Client, url: Url) -> Self {
        let name = url.host_str().unwrap_or("http").to_owned();
        Self { name, url, client }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<(), RawError> {
        let response = self
            .client
            .head(self.url.clone())
            .send()
            .await
            .map_err(|err| RawError::transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RawError::coded("probe_failed", format!("{} answered {status}", self.url))
                .with_status(status.as_u16()))
        }
    }
}

#[derive(Debug)]
struct MonitorState {
    status: ConnectionStatus,
    last_probe: Option<Instant>,
}

#[derive(Debug)]
struct RunningMonitorTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct MonitorInner {
    backend_probe: Arc<dyn ReachabilityProbe>,
    fallback_probes: Vec<Arc<dyn ReachabilityProbe>>,
    debounce_window: Duration,
    probe_timeout: Duration,
    state: Mutex<MonitorState>,
    status_tx: watch::Sender<ConnectionStatus>,
    monitor_task: Mutex<Option<RunningMonitorTask>>,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let task = self
            .monitor_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = task {
            running.stop.cancel();
            running.task.abort();
        }
    }
}

/// Process-wide connectivity service. Clones share one cached status.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    /// `backend_probe` runs first; `fallback_probes` run in order only when
    /// it fails.
    pub fn new(
        backend_probe: Arc<dyn ReachabilityProbe>,
        fallback_probes: Vec<Arc<dyn ReachabilityProbe>>,
        config: &ResilienceConfig,
    ) -> Self {
        let status = ConnectionStatus::default();
        let (status_tx, _) = watch::channel(status);
        Self {
            inner: Arc::new(MonitorInner {
                backend_probe,
                fallback_probes,
                debounce_window: config.debounce_window,
                probe_timeout: config.probe_timeout,
                state: Mutex::new(MonitorState {
                    status,
                    last_probe: None,
                }),
                status_tx,
                monitor_task: Mutex::new(None),
            }),
        }
    }

    /// Build HTTP fallback probes from URL strings, skipping unparsable ones.
    pub fn http_probes(client: &Client, urls: &[String]) -> Vec<Arc<dyn ReachabilityProbe>> {
        urls.iter()
            .filter_map(|raw| match Url::parse(raw) {
                Ok(url) => Some(Arc::new(HttpProbe::new(client.clone(), url)) as Arc<dyn ReachabilityProbe>),
                Err(err) => {
                    warn!(url = %raw, error = %err, "ignoring invalid fallback probe url");
                    None
                }
            })
            .collect()
    }

    /// Start periodic checks. No-op when already running.
    ///
    /// The first check is forced and runs immediately. Must be called from
    /// within a Tokio runtime.
    pub fn start_monitoring(&self, interval: Duration) {
        let mut guard = lock(&self.inner.monitor_task);
        if guard.is_some() {
            return;
        }

        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut force = true;

            loop {
                tokio::select! {
                    _ = stop_child.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(monitor) = upgrade(&weak) else {
                            break;
                        };
                        monitor.check_now(force).await;
                        force = false;
                    }
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "connectivity monitoring started");
        *guard = Some(RunningMonitorTask { stop, task });
    }

    /// Cancel periodic checks. Safe when not running.
    pub fn stop_monitoring(&self) {
        let running = lock(&self.inner.monitor_task).take();
        if let Some(running) = running {
            running.stop.cancel();
            running.task.abort();
            info!("connectivity monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner.monitor_task).is_some()
    }

    /// Probe unless an unforced call lands inside the debounce window, in
    /// which case the cached status is returned without network traffic.
    pub async fn check_now(&self, force: bool) -> bool {
        {
            let mut state = lock(&self.inner.state);
            let now = Instant::now();
            if !force
                && let Some(last) = state.last_probe
                && now.duration_since(last) < self.inner.debounce_window
            {
                return state.status.online;
            }
            state.last_probe = Some(now);
        }

        let reachability = self.probe_endpoints().await;
        self.record(reachability)
    }

    /// Cached status. When offline, also schedules a forced re-check in the
    /// background without waiting for it.
    pub fn status(&self) -> bool {
        let online = lock(&self.inner.state).status.online;
        if !online {
            self.spawn_recheck();
        }
        online
    }

    /// Cached status with reachability detail; never probes.
    pub fn snapshot(&self) -> ConnectionStatus {
        lock(&self.inner.state).status
    }

    /// Receiver notified whenever the cached status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    fn spawn_recheck(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let monitor = self.clone();
        handle.spawn(async move {
            monitor.check_now(true).await;
        });
    }

    async fn probe_endpoints(&self) -> Reachability {
        if self.run_probe(&self.inner.backend_probe).await {
            return Reachability::Backend;
        }
        for probe in &self.inner.fallback_probes {
            if self.run_probe(probe).await {
                return Reachability::InternetOnly;
            }
        }
        Reachability::Offline
    }

    async fn run_probe(&self, probe: &Arc<dyn ReachabilityProbe>) -> bool {
        match tokio::time::timeout(self.inner.probe_timeout, probe.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(probe = probe.name(), error = ?err, "reachability probe failed");
                false
            }
            Err(_) => {
                debug!(
                    probe = probe.name(),
                    timeout_ms = self.inner.probe_timeout.as_millis() as u64,
                    "reachability probe timed out"
                );
                false
            }
        }
    }

    fn record(&self, reachability: Reachability) -> bool {
        let online = reachability.is_online();
        let mut state = lock(&self.inner.state);
        let was_online = state.status.online;
        state.status = ConnectionStatus {
            online,
            reachability,
            last_checked_at: Some(SystemTime::now()),
        };

        if was_online != online {
            if online {
                info!(?reachability, "connection status changed: online");
            } else {
                warn!("connection status changed: offline");
            }
        }

        self.inner.status_tx.send_replace(state.status);
        online
    }
}

fn upgrade(weak: &Weak<MonitorInner>) -> Option<ConnectivityMonitor> {
    weak.upgrade().map(|inner| ConnectivityMonitor { inner })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
