//! Glue between the engine and the network.
//!
//! Every inbound frame is handled on its own task; the engine serializes state access, so the
//! only ordering guarantee is the one the protocol's checks enforce.

use crate::engine::{ConsensusEngine, Outbound};
use crate::transport::{read_frame, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct NodeRunner {
    engine: Arc<ConsensusEngine>,
    transport: Arc<dyn Transport>,
}

impl NodeRunner {
    pub fn new(engine: Arc<ConsensusEngine>, transport: Arc<dyn Transport>) -> Self {
        Self { engine, transport }
    }

    pub fn engine(&self) -> &Arc<ConsensusEngine> { &self.engine }

    /// Runs one frame through the engine and dispatches whatever it asks for. Rejections were
    /// already logged by the engine.
    pub fn deliver(&self, frame: &[u8]) {
        if let Ok(actions) = self.engine.handle_incoming(frame) {
            self.dispatch(actions);
        }
    }

    /// Fire-and-forget: one task per destination so a slow peer never blocks the others.
    pub fn dispatch(&self, actions: Vec<Outbound>) {
        for action in actions {
            match action {
                Outbound::Broadcast { command, frame } => {
                    for peer in self.engine.peers() {
                        let transport = self.transport.clone();
                        let (addr, id, frame) = (peer.addr.clone(), peer.id.clone(), frame.clone());
                        tokio::spawn(async move {
                            match transport.send(&addr, frame).await {
                                Ok(()) => debug!(%command, peer = %id, "sent"),
                                Err(e) => warn!(%command, peer = %id, error = %e, "send failed"),
                            }
                        });
                    }
                }
                Outbound::Reply { client_addr, text } => {
                    let transport = self.transport.clone();
                    tokio::spawn(async move {
                        if let Err(e) = transport.send(&client_addr, text.into_bytes()).await {
                            warn!(client = %client_addr, error = %e, "reply failed");
                        }
                    });
                }
            }
        }
    }

    /// Accepts connections until the task is dropped; each connection carries one frame.
    /// Accept failures (e.g. descriptor exhaustion) are logged and retried after a short pause.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        info!(node = %self.engine.node_id(), addr = %listener.local_addr()?, primary = self.engine.is_primary(), "node listening");
        loop {
            let (mut socket, remote) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let runner = self.clone();
            tokio::spawn(async move {
                match read_frame(&mut socket).await {
                    Ok(frame) => runner.deliver(&frame),
                    Err(e) => warn!(%remote, error = %e, "dropping inbound frame"),
                }
            });
        }
    }

    /// Drains an in-process inbox, e.g. one registered on a `MemoryTransport`.
    pub fn spawn_inbox(self, mut inbox: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                self.deliver(&frame);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Request};
    use crate::transport::{MemoryTransport, TcpTransport, MAX_FRAME_LEN};
    use pbft_core::crypto::signing_key_from_bytes;
    use pbft_core::{ClusterConfig, MemoryKeyStore, NodeId};
    use tokio::net::TcpStream;

    fn primary_engine() -> ConsensusEngine {
        let public = |i: u8| signing_key_from_bytes(&[i + 1; 32]).unwrap().verifying_key().to_bytes().to_vec();
        let mut keys = MemoryKeyStore::new();
        for i in 0..4u8 {
            keys = keys.with_public(NodeId(format!("N{i}")), public(i));
        }
        let keys = keys.with_keypair("N0", vec![1; 32], public(0));
        ConsensusEngine::new(&ClusterConfig::default(), &keys).unwrap()
    }

    #[tokio::test]
    async fn keeps_serving_after_bad_connections() {
        let engine = Arc::new(primary_engine());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(NodeRunner::new(engine.clone(), Arc::new(MemoryTransport::new())).serve(listener));

        TcpTransport.send(&addr, b"garbage".to_vec()).await.unwrap();
        drop(TcpStream::connect(&addr).await.unwrap());
        // the node stops reading past the cap, so the sender may see a reset
        let _ = TcpTransport.send(&addr, vec![b'x'; MAX_FRAME_LEN + 64]).await;

        let request = Request { id: 1, content: "hello".into(), client_addr: "127.0.0.1:8888".into(), timestamp: 7 };
        TcpTransport.send(&addr, Message::Request(request).encode().unwrap()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.sequence_id() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("valid request was not processed");
        assert_eq!(engine.sequence_id(), 1);
        assert!(!server.is_finished());
    }
}
