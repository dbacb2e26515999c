//! Core shared utilities for the MediLearn federated learning controller.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use once_cell::sync::OnceCell;
use prometheus::{Encoder, TextEncoder};
use tracing::info;
use tracing_subscriber::prelude::*;

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static PROM_INIT: OnceCell<()> = OnceCell::new();
static NODE_READINESS: AtomicBool = AtomicBool::new(false);

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn is_ready() -> bool { NODE_READINESS.load(Ordering::SeqCst) }

/// Installs the global subscriber once. `MEDILEARN_JSON_LOG=1|true` switches to JSON lines;
/// filtering follows `RUST_LOG` and defaults to `info`.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("MEDILEARN_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let json_layer = json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
        });
        let text_layer = (!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
        });
        tracing_subscriber::registry().with(env_filter).with(json_layer).with(text_layer).try_init()?;
        Ok(())
    })?;
    info!(target: "medilearn", service, "tracing initialized");
    Ok(())
}

pub fn init_metrics() -> Result<()> {
    PROM_INIT.get_or_try_init(|| -> Result<()> {
        metrics::FL_METRICS.register(prometheus::default_registry())?;
        Ok(())
    })?;
    Ok(())
}

/// Text exposition of the default registry.
pub fn render_metrics() -> Result<String> {
    let families = prometheus::default_registry().gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&families, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

pub mod federated_learning;
pub mod metrics;
pub mod settings;
pub mod state_store;

pub use federated_learning::{
    CoordinatorSettings, CycleRecord, FederatedLearningCoordinator, GlobalModelSnapshot, HttpNodeClient, ModelParameters,
    NodeEndpoint, NodeResult, RunConfig, Status, TrainingClient,
};
pub use metrics::{FederatedLearningMetrics, FL_METRICS};
pub use settings::{load_settings, ControllerSettings};
pub use state_store::{StateStore, StoreError, StoreKey};
