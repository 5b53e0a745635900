use anyhow::{Context, Result};
use consensus_core::{serve_replies, Client, ConsensusEngine, NodeRunner, TcpTransport};
use pbft_core::{init_tracing, load_config, ClusterConfig, FileKeyStore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("consensus-core")?;
    let cfg = load_config()?;
    if cfg.is_client() { run_client(cfg).await } else { run_node(cfg).await }
}

async fn run_node(cfg: ClusterConfig) -> Result<()> {
    let keys = FileKeyStore::new(&cfg.keys_dir);
    info!(node = %cfg.node_id, keys = %keys.root().display(), "loading key material");
    let engine = ConsensusEngine::new(&cfg, &keys).with_context(|| format!("starting node {}", cfg.node_id))?;
    let addr = cfg.addr_of(&cfg.node_id).context("own address missing from node table")?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    let runner = NodeRunner::new(Arc::new(engine), Arc::new(TcpTransport));
    tokio::select! {
        res = runner.serve(listener) => res,
        _ = tokio::signal::ctrl_c() => {
            info!(node = %cfg.node_id, "shutdown signal received");
            Ok(())
        }
    }
}

/// Reads one request per stdin line and prints replies as they arrive.
/// Runs until interrupted, so replies to the last line are still shown after stdin closes.
async fn run_client(cfg: ClusterConfig) -> Result<()> {
    let listener = TcpListener::bind(&cfg.client_addr).await.with_context(|| format!("binding {}", cfg.client_addr))?;
    let mut replies = serve_replies(listener);
    tokio::spawn(async move {
        while let Some(reply) = replies.recv().await {
            println!("{reply}");
        }
    });
    let client = Client::from_config(&cfg, Arc::new(TcpTransport))?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut next_id = 0u64;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed, waiting for replies until interrupted");
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                let content = line.trim();
                if content.is_empty() { continue; }
                next_id += 1;
                if let Err(e) = client.submit(next_id, content).await {
                    error!(request_id = next_id, error = %e, "submit failed");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    info!("client exiting");
    Ok(())
}
