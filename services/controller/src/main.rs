use std::sync::Arc;

use anyhow::{Context, Result};
use medilearn_controller::{router, AppState};
use medilearn_core::{FederatedLearningCoordinator, HttpNodeClient, StateStore};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    medilearn_core::init_tracing("medilearn-controller")?;
    medilearn_core::init_metrics()?;
    let settings = medilearn_core::load_settings()?;
    info!(target: "medilearn-controller", bind = %settings.bind_addr, state_dir = %settings.state_dir.display(), "Starting medilearn-controller");

    let store = match StateStore::open(settings.state_dir.clone()).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "state_store_unavailable");
            return Err(e.into());
        }
    };
    let client = Arc::new(HttpNodeClient::new(settings.node_timeout()).context("building node http client")?);
    let coordinator = FederatedLearningCoordinator::new(store, client, settings.coordinator_settings());
    let app = router(AppState::new(coordinator, settings.stream_interval()));

    let listener = TcpListener::bind(&settings.bind_addr).await.with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(addr = ?listener.local_addr()?, "controller_listening");
    medilearn_core::mark_ready();
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    medilearn_core::clear_ready();
    info!("controller_stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "ctrl_c_listener_failed");
    }
}
