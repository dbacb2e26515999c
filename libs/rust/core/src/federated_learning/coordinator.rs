//! Controller loop: runs the configured cycles one after another, carrying each cycle's
//! aggregate into the next, and checkpoints status, history, model and audit entries to
//! the state store after every cycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::cycle::CycleRunner;
use super::error::ControllerError;
use super::lifecycle::{RunLifecycle, RunPhase};
use super::model::{AuditAction, AuditEntry, CycleRecord, GlobalModelSnapshot, RunConfig, RunId, Status};
use super::node_client::TrainingClient;
use crate::metrics::FL_METRICS;
use crate::state_store::{StateStore, StoreError, StoreKey};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub inter_cycle_delay: Duration,
    /// Used when the store holds no run configuration.
    pub default_run: RunConfig,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self { inter_cycle_delay: Duration::from_secs(1), default_run: RunConfig::default() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub cycles: u32,
    pub final_accuracy: f64,
    pub model_version: Option<u64>,
}

/// Returned by [`FederatedLearningCoordinator::start`]. Dropping it detaches the run.
pub struct RunHandle {
    pub run_id: RunId,
    pub cycle_count: u32,
    pub nodes: Vec<String>,
    pub join: JoinHandle<Result<RunSummary, StoreError>>,
}

#[derive(Clone)]
pub struct FederatedLearningCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<StateStore>,
    runner: CycleRunner,
    settings: CoordinatorSettings,
    lifecycle: RwLock<RunLifecycle>,
    // serializes run admission against reset
    control: Mutex<()>,
}

impl FederatedLearningCoordinator {
    pub fn new(store: Arc<StateStore>, client: Arc<dyn TrainingClient>, settings: CoordinatorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                runner: CycleRunner::new(client),
                settings,
                lifecycle: RwLock::new(RunLifecycle::new()),
                control: Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> { &self.inner.store }
    pub fn phase(&self) -> RunPhase { self.inner.lifecycle.read().phase().clone() }
    pub fn is_running(&self) -> bool { self.inner.lifecycle.read().is_running() }
    pub fn last_error(&self) -> Option<String> { self.inner.lifecycle.read().last_error().map(str::to_string) }
    pub fn runs_finished(&self) -> u64 { self.inner.lifecycle.read().runs_finished() }
    pub fn in_phase_for(&self) -> Duration { self.inner.lifecycle.read().in_phase_for() }

    /// The configuration the next run will use.
    pub async fn run_config(&self) -> Result<RunConfig, StoreError> {
        match self.inner.store.read::<RunConfig>(StoreKey::Config).await? {
            Some(cfg) => match cfg.validate() {
                Ok(()) => Ok(cfg),
                Err(e) => {
                    warn!(error = %e, "stored_config_invalid_using_default");
                    Ok(self.inner.settings.default_run.clone())
                }
            },
            None => Ok(self.inner.settings.default_run.clone()),
        }
    }

    /// Validates and stores a new configuration. An in-flight run keeps the one it loaded.
    pub async fn update_config(&self, config: RunConfig) -> Result<RunConfig, ControllerError> {
        config.validate()?;
        self.inner.store.write(StoreKey::Config, &config).await?;
        info!(cycle_count = config.cycle_count, nodes = config.node_endpoints.len(), "run_config_updated");
        Ok(config)
    }

    /// Begins a run in the background and returns as soon as it is admitted.
    pub async fn start(&self) -> Result<RunHandle, ControllerError> {
        let _control = self.inner.control.lock().await;
        let config = self.run_config().await?;
        let run_id = Uuid::new_v4();
        let admitted = self.inner.lifecycle.write().begin(run_id, config.cycle_count);
        if let Err(current) = admitted {
            FL_METRICS.runs_rejected_total.inc();
            warn!(%current, "start_rejected_run_in_progress");
            return Err(ControllerError::AlreadyRunning { run_id: current });
        }
        FL_METRICS.runs_started_total.inc();
        info!(%run_id, cycle_count = config.cycle_count, nodes = config.node_endpoints.len(), "run_started");

        let cycle_count = config.cycle_count;
        let nodes = config.node_names();
        let this = self.clone();
        let join = tokio::spawn(async move {
            let guard = RunGuard { coordinator: this.clone(), run_id, armed: true };
            let result = this.execute(run_id, &config).await;
            guard.disarm();
            this.complete(run_id, &result);
            result
        });
        Ok(RunHandle { run_id, cycle_count, nodes, join })
    }

    /// Clears every state document. Refused while a run is in progress.
    pub async fn reset(&self) -> Result<(), ControllerError> {
        let _control = self.inner.control.lock().await;
        let running = self.inner.lifecycle.read().current_run();
        if let Some(run_id) = running {
            return Err(ControllerError::Busy { run_id });
        }
        self.inner.store.reset(&StoreKey::ALL).await?;
        info!("state_reset");
        Ok(())
    }

    pub async fn status(&self) -> Result<Option<Status>, StoreError> { self.inner.store.read(StoreKey::Status).await }
    pub async fn history(&self) -> Result<Vec<CycleRecord>, StoreError> { self.inner.store.read_log(StoreKey::History).await }
    pub async fn global_model(&self) -> Result<Option<GlobalModelSnapshot>, StoreError> { self.inner.store.read(StoreKey::GlobalModel).await }
    pub async fn audit_log(&self) -> Result<Vec<AuditEntry>, StoreError> { self.inner.store.read_log(StoreKey::AuditLog).await }

    #[instrument(skip(self, config))]
    async fn execute(&self, run_id: RunId, config: &RunConfig) -> Result<RunSummary, StoreError> {
        let store = &self.inner.store;
        // resume from whatever was last durably written
        let mut model: Option<GlobalModelSnapshot> = store.read(StoreKey::GlobalModel).await?;
        let mut cycles_completed = store.read::<Status>(StoreKey::Status).await?.map(|s| s.cycles_completed).unwrap_or(0);
        let mut final_accuracy = 0.0;

        for cycle in 1..=config.cycle_count {
            self.inner.lifecycle.write().advance(run_id, cycle);
            store.append(StoreKey::AuditLog, AuditEntry::now(run_id, cycle, AuditAction::Starting)).await?;

            let seed = model.as_ref().map(|m| &m.parameters);
            let record = self.inner.runner.run_cycle(run_id, cycle, &config.node_endpoints, seed).await;
            cycles_completed += 1;
            final_accuracy = record.global_accuracy;

            let snapshot = record.global_model.clone().map(|parameters| GlobalModelSnapshot {
                version: model.as_ref().map(|m| m.version).unwrap_or(0) + 1,
                run_id,
                cycle_index: cycle,
                parameters,
                updated_at: record.timestamp,
            });
            store.write(StoreKey::Status, &Status { run_id, cycles_completed, latest: record.clone() }).await?;
            store.append(StoreKey::History, record).await?;
            // an all-failed cycle leaves the previous model in place
            if let Some(snapshot) = snapshot {
                store.write(StoreKey::GlobalModel, &snapshot).await?;
                model = Some(snapshot);
            }
            store.append(StoreKey::AuditLog, AuditEntry::now(run_id, cycle, AuditAction::Completed)).await?;

            if cycle < config.cycle_count && !self.inner.settings.inter_cycle_delay.is_zero() {
                tokio::time::sleep(self.inner.settings.inter_cycle_delay).await;
            }
        }

        Ok(RunSummary { run_id, cycles: config.cycle_count, final_accuracy, model_version: model.map(|m| m.version) })
    }

    fn complete(&self, run_id: RunId, result: &Result<RunSummary, StoreError>) {
        let error = match result {
            Ok(summary) => {
                info!(%run_id, cycles = summary.cycles, final_accuracy = summary.final_accuracy, model_version = ?summary.model_version, "run_completed");
                None
            }
            Err(e) => {
                FL_METRICS.runs_failed_total.inc();
                error!(%run_id, error = %e, "run_aborted_storage_failure");
                Some(e.to_string())
            }
        };
        self.inner.lifecycle.write().finish(run_id, error);
    }
}

/// Returns the lifecycle to Idle if the run task unwinds before reaching `complete`.
struct RunGuard {
    coordinator: FederatedLearningCoordinator,
    run_id: RunId,
    armed: bool,
}

impl RunGuard {
    fn disarm(mut self) { self.armed = false; }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        FL_METRICS.runs_failed_total.inc();
        error!(run_id = %self.run_id, "run_task_panicked");
        self.coordinator.inner.lifecycle.write().finish(self.run_id, Some("run task panicked".into()));
    }
}
