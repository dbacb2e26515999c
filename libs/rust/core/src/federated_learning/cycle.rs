//! One training cycle: concurrent fan-out to every endpoint, then aggregation.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use super::aggregator::{aggregate_accuracy, aggregate_parameters, shape_outliers};
use super::model::{CycleOutcome, CycleRecord, ModelParameters, NodeEndpoint, NodeErrorKind, NodeResult, RunId};
use super::node_client::TrainingClient;
use crate::metrics::FL_METRICS;

#[derive(Clone)]
pub struct CycleRunner {
    client: Arc<dyn TrainingClient>,
}

impl CycleRunner {
    pub fn new(client: Arc<dyn TrainingClient>) -> Self { Self { client } }

    /// Waits for every node call to finish or time out; results come back in endpoint order.
    pub async fn run_cycle(
        &self,
        run_id: RunId,
        cycle_index: u32,
        node_endpoints: &[NodeEndpoint],
        global_model: Option<&ModelParameters>,
    ) -> CycleRecord {
        let started = Instant::now();
        info!(%run_id, cycle = cycle_index, nodes = node_endpoints.len(), seeded = global_model.is_some(), "cycle_started");

        let calls = node_endpoints.iter().map(|ep| self.client.train(ep, global_model));
        let mut node_results: Vec<NodeResult> = join_all(calls).await;

        for idx in shape_outliers(&node_results) {
            let name = node_results[idx].node_name.clone();
            warn!(%run_id, cycle = cycle_index, node = %name, "parameter_shape_mismatch");
            node_results[idx] = NodeResult::failed(name, NodeErrorKind::ShapeMismatch, "parameter shape differs from the cycle majority");
        }

        let global_accuracy = aggregate_accuracy(&node_results);
        let next_model = aggregate_parameters(&node_results);
        let outcome = CycleOutcome::from_results(&node_results);

        for r in &node_results {
            FL_METRICS.node_results_total.with_label_values(&[r.node_name.as_str(), r.outcome_label()]).inc();
        }
        FL_METRICS.cycles_total.with_label_values(&[outcome.as_str()]).inc();
        FL_METRICS.cycle_latency_seconds.observe(started.elapsed().as_secs_f64());
        if outcome != CycleOutcome::AllFailed {
            FL_METRICS.global_accuracy.set(global_accuracy);
        }

        match outcome {
            CycleOutcome::AllFailed => warn!(%run_id, cycle = cycle_index, "all_nodes_failed"),
            _ => info!(%run_id, cycle = cycle_index, global_accuracy, outcome = outcome.as_str(), elapsed_ms = started.elapsed().as_millis() as u64, "cycle_aggregated"),
        }

        CycleRecord {
            run_id,
            cycle_index,
            global_accuracy,
            outcome,
            node_results,
            global_model: next_model,
            timestamp: Utc::now(),
        }
    }
}
