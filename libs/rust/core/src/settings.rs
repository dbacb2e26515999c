//! Controller settings: built-in defaults, then an optional file named by
//! `MEDILEARN_CONFIG_FILE`, then `MEDILEARN_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::federated_learning::{default_endpoints, CoordinatorSettings, NodeEndpoint, RunConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub bind_addr: String,
    pub state_dir: PathBuf,
    pub node_timeout_ms: u64,
    pub inter_cycle_delay_ms: u64,
    pub stream_interval_ms: u64,
    /// Fallback run configuration, used until one is stored through a config update.
    pub cycle_count: u32,
    pub nodes: Vec<NodeEndpoint>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".into(),
            state_dir: PathBuf::from("./state"),
            node_timeout_ms: 15_000,
            inter_cycle_delay_ms: 1_000,
            stream_interval_ms: 2_000,
            cycle_count: 3,
            nodes: default_endpoints(),
        }
    }
}

impl ControllerSettings {
    pub fn node_timeout(&self) -> Duration { Duration::from_millis(self.node_timeout_ms) }
    pub fn inter_cycle_delay(&self) -> Duration { Duration::from_millis(self.inter_cycle_delay_ms) }
    pub fn stream_interval(&self) -> Duration { Duration::from_millis(self.stream_interval_ms) }

    pub fn default_run(&self) -> RunConfig {
        RunConfig { cycle_count: self.cycle_count, node_endpoints: self.nodes.clone() }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings { inter_cycle_delay: self.inter_cycle_delay(), default_run: self.default_run() }
    }
}

pub fn load_settings() -> Result<ControllerSettings> {
    let mut builder = config::Config::builder();
    if let Ok(file) = std::env::var("MEDILEARN_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("MEDILEARN")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let settings: ControllerSettings = builder.build()?.try_deserialize()?;
    if settings.stream_interval_ms == 0 {
        anyhow::bail!("stream_interval_ms must be greater than zero");
    }
    settings.default_run().validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_node_contract() {
        let s = ControllerSettings::default();
        assert_eq!(s.node_timeout(), Duration::from_secs(15));
        assert_eq!(s.inter_cycle_delay(), Duration::from_secs(1));
        assert_eq!(s.stream_interval(), Duration::from_secs(2));
        let run = s.default_run();
        assert_eq!(run.cycle_count, 3);
        assert_eq!(run.node_names(), vec!["Hospital_A", "Hospital_B", "Hospital_C"]);
        assert!(run.validate().is_ok());
    }

    #[test]
    fn partial_document_keeps_remaining_defaults() {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str("cycle_count: 5\nstate_dir: /tmp/medilearn\n", config::FileFormat::Yaml))
            .build()
            .unwrap();
        let s: ControllerSettings = cfg.try_deserialize().unwrap();
        assert_eq!(s.cycle_count, 5);
        assert_eq!(s.state_dir, PathBuf::from("/tmp/medilearn"));
        assert_eq!(s.bind_addr, "127.0.0.1:8000");
        assert_eq!(s.nodes.len(), 3);
    }
}
