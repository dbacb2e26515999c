//! Training requests to a single node.
//!
//! Every call resolves to a [`NodeResult`]; transport and decoding failures are folded
//! into [`NodeErrorKind`] so one bad node never fails the cycle.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::model::{LocalUpdate, ModelParameters, NodeEndpoint, NodeErrorKind, NodeResult};

pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait TrainingClient: Send + Sync {
    async fn train(&self, endpoint: &NodeEndpoint, global_model: Option<&ModelParameters>) -> NodeResult;
}

#[derive(Debug, Serialize)]
struct TrainRequest<'a> {
    global_weights: Option<&'a ModelParameters>,
}

#[derive(Debug, Deserialize)]
struct TrainResponse {
    accuracy: f64,
    samples: u64,
    weights: ModelParameters,
    #[serde(default)]
    hospital: Option<String>,
}

#[derive(Debug)]
struct NodeFailure {
    kind: NodeErrorKind,
    detail: String,
}

impl NodeFailure {
    fn new(kind: NodeErrorKind, detail: impl Into<String>) -> Self { Self { kind, detail: detail.into() } }
}

impl From<reqwest::Error> for NodeFailure {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            NodeErrorKind::Timeout
        } else if e.is_decode() || e.is_body() {
            NodeErrorKind::InvalidResponse
        } else {
            NodeErrorKind::Unreachable
        };
        Self::new(kind, e.to_string())
    }
}

/// HTTP client for the node `/train` contract. The timeout bounds the whole exchange,
/// body included.
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpNodeClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, timeout })
    }

    pub fn timeout(&self) -> Duration { self.timeout }

    async fn request(&self, endpoint: &NodeEndpoint, global_model: Option<&ModelParameters>) -> Result<LocalUpdate, NodeFailure> {
        let resp = self
            .http
            .post(&endpoint.address)
            .json(&TrainRequest { global_weights: global_model })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NodeFailure::new(NodeErrorKind::InvalidResponse, format!("node answered HTTP {status}")));
        }
        let body = resp.bytes().await?;
        let parsed: TrainResponse = serde_json::from_slice(&body)
            .map_err(|e| NodeFailure::new(NodeErrorKind::InvalidResponse, format!("malformed training response: {e}")))?;
        validate(parsed)
    }
}

fn validate(resp: TrainResponse) -> Result<LocalUpdate, NodeFailure> {
    let invalid = |msg: String| NodeFailure::new(NodeErrorKind::InvalidResponse, msg);
    if !resp.accuracy.is_finite() || !(0.0..=1.0).contains(&resp.accuracy) {
        return Err(invalid(format!("accuracy {} outside [0, 1]", resp.accuracy)));
    }
    if resp.samples == 0 {
        return Err(invalid("node reported zero local samples".into()));
    }
    if resp.weights.shape().is_none() {
        return Err(invalid("coefficient rows have unequal lengths".into()));
    }
    if !resp.weights.is_finite() {
        return Err(invalid("weights contain non-finite values".into()));
    }
    Ok(LocalUpdate { accuracy: resp.accuracy, sample_count: resp.samples, parameters: resp.weights, hospital: resp.hospital })
}

#[async_trait]
impl TrainingClient for HttpNodeClient {
    #[instrument(skip(self, global_model), fields(node = %endpoint.name, seeded = global_model.is_some()))]
    async fn train(&self, endpoint: &NodeEndpoint, global_model: Option<&ModelParameters>) -> NodeResult {
        match self.request(endpoint, global_model).await {
            Ok(update) => {
                debug!(accuracy = update.accuracy, samples = update.sample_count, "node_trained");
                NodeResult::trained(endpoint.name.clone(), update)
            }
            Err(failure) => {
                warn!(address = %endpoint.address, error = failure.kind.as_str(), detail = %failure.detail, "node_failed");
                NodeResult::failed(endpoint.name.clone(), failure.kind, failure.detail)
            }
        }
    }
}
