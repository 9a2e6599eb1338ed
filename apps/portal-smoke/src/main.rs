mod config;
mod logging;

use std::{process::ExitCode, sync::Arc};

use portal_backend::{
    BackendProbe, BackendService, ConnectivityMonitor, ResilientRequestExecutor, RestBackend,
    RestBackendConfig, SessionManager,
};
use portal_platform::{FileDurableStore, auth_cache};
use tracing::{error, info, warn};

use crate::config::SmokeConfig;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let backend_config = match RestBackendConfig::new(&config.backend_url, config.anon_key.clone()) {
        Ok(backend_config) => backend_config,
        Err(err) => {
            error!(error = %err, "invalid backend configuration");
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(FileDurableStore::new(&config.cache_path));
    let client = reqwest::Client::new();
    let backend: Arc<dyn BackendService> = Arc::new(RestBackend::new(
        client.clone(),
        backend_config,
        auth_cache(store.clone()),
    ));

    let connectivity = ConnectivityMonitor::new(
        Arc::new(BackendProbe::new(backend.clone())),
        ConnectivityMonitor::http_probes(&client, &config.resilience.fallback_probe_urls),
        &config.resilience,
    );
    connectivity.start_monitoring(config.resilience.monitor_interval);

    let online = connectivity.check_now(true).await;
    let status = connectivity.snapshot();
    info!(online, reachability = ?status.reachability, "initial connectivity check");

    let executor = ResilientRequestExecutor::new(connectivity.clone(), &config.resilience);
    let manager = SessionManager::new(backend, executor, auth_cache(store));
    manager.start().await;

    let exit = match config.credentials() {
        None => {
            info!("PORTAL_EMAIL/PORTAL_PASSWORD not set; skipping live sign-in");
            if online { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        }
        Some((email, password)) => match manager.sign_in(email, password).await {
            Ok(user) => {
                let snapshot = manager.snapshot();
                let profile = snapshot.profile.as_ref();
                info!(
                    user_id = %user.id,
                    full_name = profile.map(|p| p.full_name.as_str()).unwrap_or("-"),
                    role = profile.map(|p| p.role.as_str()).unwrap_or("-"),
                    phase = ?snapshot.phase,
                    "sign-in smoke passed"
                );
                manager.sign_out().await;
                ExitCode::SUCCESS
            }
            Err(err) => {
                warn!(
                    error = %err,
                    recovery = ?err.recovery_action(),
                    "sign-in smoke failed: {}",
                    err.user_message()
                );
                ExitCode::FAILURE
            }
        },
    };

    manager.shutdown();
    connectivity.stop_monitoring();
    exit
}
