//! Shared plumbing for PBFT cluster nodes: tracing, cluster configuration, credentials and
//! the digest/signature primitives every node agrees on.

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod node;

pub use config::{load_config, load_config_file, ClusterConfig, ConfigError, NodeEntry};
pub use credentials::{FileKeyStore, KeyKind, KeyStore, KeyStoreError, MemoryKeyStore};
pub use crypto::{sign, verify, CryptoError, Digest};
pub use node::NodeId;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Installs the process-wide subscriber. `RUST_LOG` drives the filter (default `info`);
/// `PBFT_JSON_LOG=1` switches the output to flattened JSON events.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("PBFT_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let (json_layer, text_layer) = if json {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false);
            (Some(layer), None)
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true);
            (None, Some(layer))
        };
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .with(text_layer)
            .try_init()?;
        Ok(())
    })?;
    info!(%service, "tracing initialized");
    Ok(())
}
