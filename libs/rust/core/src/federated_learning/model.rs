//! Records exchanged between the node client, the aggregator, the cycle runner and the
//! coordinator, and persisted verbatim in the state store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ConfigError;

pub type RunId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub name: String,
    pub address: String,
}

impl NodeEndpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self { name: name.into(), address: address.into() }
    }
}

/// Linear model parameters. On the wire this is the two-element array
/// `[coefficients, intercepts]` the nodes exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireParameters", into = "WireParameters")]
pub struct ModelParameters {
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

type WireParameters = (Vec<Vec<f64>>, Vec<f64>);

impl From<WireParameters> for ModelParameters {
    fn from((coefficients, intercepts): WireParameters) -> Self {
        Self { coefficients, intercepts }
    }
}

impl From<ModelParameters> for WireParameters {
    fn from(p: ModelParameters) -> Self {
        (p.coefficients, p.intercepts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterShape {
    pub rows: usize,
    pub cols: usize,
    pub intercepts: usize,
}

impl ModelParameters {
    pub fn new(coefficients: Vec<Vec<f64>>, intercepts: Vec<f64>) -> Self {
        Self { coefficients, intercepts }
    }

    /// `None` when the coefficient rows are ragged.
    pub fn shape(&self) -> Option<ParameterShape> {
        let cols = self.coefficients.first().map(Vec::len).unwrap_or(0);
        if self.coefficients.iter().any(|row| row.len() != cols) {
            return None;
        }
        Some(ParameterShape { rows: self.coefficients.len(), cols, intercepts: self.intercepts.len() })
    }

    pub fn is_finite(&self) -> bool {
        self.coefficients.iter().flatten().chain(self.intercepts.iter()).all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    Timeout,
    Unreachable,
    InvalidResponse,
    /// Parameters disagreed with the majority shape of the cycle.
    ShapeMismatch,
}

impl NodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeErrorKind::Timeout => "timeout",
            NodeErrorKind::Unreachable => "unreachable",
            NodeErrorKind::InvalidResponse => "invalid_response",
            NodeErrorKind::ShapeMismatch => "shape_mismatch",
        }
    }
}

/// A node's locally trained contribution. `sample_count` is always > 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalUpdate {
    pub accuracy: f64,
    pub sample_count: u64,
    pub parameters: ModelParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    Trained(LocalUpdate),
    Failed { error: NodeErrorKind, detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_name: String,
    pub outcome: NodeOutcome,
}

impl NodeResult {
    pub fn trained(node_name: impl Into<String>, update: LocalUpdate) -> Self {
        Self { node_name: node_name.into(), outcome: NodeOutcome::Trained(update) }
    }

    pub fn failed(node_name: impl Into<String>, error: NodeErrorKind, detail: impl Into<String>) -> Self {
        Self { node_name: node_name.into(), outcome: NodeOutcome::Failed { error, detail: detail.into() } }
    }

    pub fn update(&self) -> Option<&LocalUpdate> {
        match &self.outcome {
            NodeOutcome::Trained(u) => Some(u),
            NodeOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<NodeErrorKind> {
        match &self.outcome {
            NodeOutcome::Trained(_) => None,
            NodeOutcome::Failed { error, .. } => Some(*error),
        }
    }

    pub fn is_success(&self) -> bool { self.update().is_some() }

    /// Label used for metrics and logs.
    pub fn outcome_label(&self) -> &'static str {
        self.error().map(|e| e.as_str()).unwrap_or("trained")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Complete,
    Partial,
    AllFailed,
}

impl CycleOutcome {
    pub fn from_results(results: &[NodeResult]) -> Self {
        let ok = results.iter().filter(|r| r.is_success()).count();
        match ok {
            0 => CycleOutcome::AllFailed,
            n if n == results.len() => CycleOutcome::Complete,
            _ => CycleOutcome::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Complete => "complete",
            CycleOutcome::Partial => "partial",
            CycleOutcome::AllFailed => "all_failed",
        }
    }
}

/// One finished cycle. Node results keep the configured endpoint order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub run_id: RunId,
    pub cycle_index: u32,
    pub global_accuracy: f64,
    pub outcome: CycleOutcome,
    pub node_results: Vec<NodeResult>,
    /// Parameters aggregated from this cycle alone; absent when nothing could be averaged.
    pub global_model: Option<ModelParameters>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub run_id: RunId,
    /// Cycles completed since the last reset, across runs.
    pub cycles_completed: u64,
    pub latest: CycleRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalModelSnapshot {
    pub version: u64,
    pub run_id: RunId,
    pub cycle_index: u32,
    pub parameters: ModelParameters,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Starting,
    Completed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Starting => "starting",
            AuditAction::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: RunId,
    pub cycle_index: u32,
    pub action: String,
    pub time: DateTime<Utc>,
}

impl AuditEntry {
    pub fn now(run_id: RunId, cycle_index: u32, action: AuditAction) -> Self {
        Self { run_id, cycle_index, action: action.as_str().to_string(), time: Utc::now() }
    }
}

/// Endpoints and cycle count for one run. Loaded once when a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub cycle_count: u32,
    pub node_endpoints: Vec<NodeEndpoint>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { cycle_count: 3, node_endpoints: default_endpoints() }
    }
}

pub fn default_endpoints() -> Vec<NodeEndpoint> {
    ["A", "B", "C"]
        .iter()
        .enumerate()
        .map(|(i, suffix)| NodeEndpoint::new(format!("Hospital_{suffix}"), format!("http://127.0.0.1:{}/train", 8001 + i)))
        .collect()
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_count == 0 {
            return Err(ConfigError::ZeroCycles);
        }
        if self.node_endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        let mut seen = HashSet::new();
        for ep in &self.node_endpoints {
            let name = ep.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }
            let url = reqwest::Url::parse(&ep.address)
                .map_err(|e| ConfigError::InvalidAddress { name: name.to_string(), reason: e.to_string() })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidAddress { name: name.to_string(), reason: format!("unsupported scheme {}", url.scheme()) });
            }
        }
        Ok(())
    }

    pub fn node_names(&self) -> Vec<String> {
        self.node_endpoints.iter().map(|ep| ep.name.clone()).collect()
    }
}
