//! Static cluster configuration.
//!
//! Layering: built-in defaults (four loopback nodes, `N0` primary) < optional file named by
//! `PBFT_CONFIG_FILE` < environment variables `PBFT__<KEY>` (e.g. `PBFT__NODE_ID=N2`).

use crate::NodeId;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: NodeId,
    pub addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Identity of this process, or `client` for the submitting client.
    pub node_id: NodeId,
    pub primary: NodeId,
    pub nodes: Vec<NodeEntry>,
    /// Where the client listens for replies.
    pub client_addr: String,
    pub keys_dir: PathBuf,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("node table is empty")]
    EmptyTable,
    #[error("node {0} appears more than once in the node table")]
    DuplicateNode(NodeId),
    #[error("primary {0} is not in the node table")]
    UnknownPrimary(NodeId),
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let nodes = (0..4)
            .map(|i| NodeEntry { id: NodeId(format!("N{i}")), addr: format!("127.0.0.1:{}", 8000 + i) })
            .collect();
        Self {
            node_id: NodeId::from("N0"),
            primary: NodeId::from("N0"),
            nodes,
            client_addr: "127.0.0.1:8888".into(),
            keys_dir: PathBuf::from("Keys"),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() { return Err(ConfigError::EmptyTable); }
        let mut seen = HashSet::new();
        for n in &self.nodes {
            if !seen.insert(&n.id) { return Err(ConfigError::DuplicateNode(n.id.clone())); }
        }
        if !seen.contains(&self.primary) { return Err(ConfigError::UnknownPrimary(self.primary.clone())); }
        Ok(())
    }

    pub fn addr_of(&self, node: &NodeId) -> Option<&str> {
        self.nodes.iter().find(|n| &n.id == node).map(|n| n.addr.as_str())
    }

    pub fn is_client(&self) -> bool { self.node_id.as_str().eq_ignore_ascii_case("client") }
}

fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(config::Config::builder().add_source(config::Config::try_from(&ClusterConfig::default())?))
}

fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<ClusterConfig> {
    let cfg: ClusterConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_config() -> Result<ClusterConfig> {
    let mut builder = defaults()?;
    if let Ok(file) = std::env::var("PBFT_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(true));
    }
    builder = builder.add_source(config::Environment::with_prefix("PBFT").separator("__"));
    let cfg = finish(builder)?;
    tracing::debug!(node_id = %cfg.node_id, nodes = cfg.nodes.len(), "cluster config loaded");
    Ok(cfg)
}

/// Defaults overlaid by a single file, ignoring the environment.
pub fn load_config_file(path: &Path) -> Result<ClusterConfig> {
    finish(defaults()?.add_source(config::File::from(path).required(true)))
}
