//! Federated learning controller: node client, FedAvg aggregator, cycle runner and the
//! coordinator that drives runs of sequential cycles.

pub mod aggregator;
pub mod coordinator;
pub mod cycle;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod node_client;

pub use aggregator::{aggregate_accuracy, aggregate_parameters, majority_shape, shape_outliers};
pub use coordinator::{CoordinatorSettings, FederatedLearningCoordinator, RunHandle, RunSummary};
pub use cycle::CycleRunner;
pub use error::{ConfigError, ControllerError};
pub use lifecycle::{RunLifecycle, RunPhase};
pub use model::{
    AuditAction, AuditEntry, CycleOutcome, CycleRecord, GlobalModelSnapshot, LocalUpdate, ModelParameters,
    NodeEndpoint, NodeErrorKind, NodeOutcome, NodeResult, ParameterShape, RunConfig, RunId, Status,
    default_endpoints,
};
pub use node_client::{HttpNodeClient, TrainingClient, DEFAULT_NODE_TIMEOUT};
