//! Prometheus metrics for the federated learning controller.
//!
//! Collectors live in a process-wide static so the cycle runner and coordinator can record
//! without threading a handle around; [`crate::init_metrics`] registers them for `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

pub struct FederatedLearningMetrics {
    pub cycles_total: IntCounterVec,
    pub node_results_total: IntCounterVec,
    pub global_accuracy: Gauge,
    pub cycle_latency_seconds: Histogram,
    pub runs_started_total: IntCounter,
    pub runs_rejected_total: IntCounter,
    pub runs_failed_total: IntCounter,
}

impl FederatedLearningMetrics {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            cycles_total: IntCounterVec::new(Opts::new("medilearn_fl_cycles_total", "Training cycles completed, by outcome"), &["outcome"])?,
            node_results_total: IntCounterVec::new(Opts::new("medilearn_fl_node_results_total", "Per-node training results, by node and outcome"), &["node", "outcome"])?,
            global_accuracy: Gauge::new("medilearn_fl_global_accuracy", "Sample-weighted accuracy of the last aggregated cycle")?,
            cycle_latency_seconds: Histogram::with_opts(
                HistogramOpts::new("medilearn_fl_cycle_latency_seconds", "Fan-out plus aggregation latency per cycle")
                    .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0]),
            )?,
            runs_started_total: IntCounter::new("medilearn_fl_runs_started_total", "Runs accepted by start")?,
            runs_rejected_total: IntCounter::new("medilearn_fl_runs_rejected_total", "Start requests refused because a run was in progress")?,
            runs_failed_total: IntCounter::new("medilearn_fl_runs_failed_total", "Runs aborted by a storage failure")?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.cycles_total.clone()))?;
        registry.register(Box::new(self.node_results_total.clone()))?;
        registry.register(Box::new(self.global_accuracy.clone()))?;
        registry.register(Box::new(self.cycle_latency_seconds.clone()))?;
        registry.register(Box::new(self.runs_started_total.clone()))?;
        registry.register(Box::new(self.runs_rejected_total.clone()))?;
        registry.register(Box::new(self.runs_failed_total.clone()))?;
        Ok(())
    }
}

pub static FL_METRICS: Lazy<FederatedLearningMetrics> =
    Lazy::new(|| FederatedLearningMetrics::new().expect("static metric definitions are valid"));
