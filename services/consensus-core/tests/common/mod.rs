#![allow(dead_code)]

use consensus_core::{ConsensusEngine, ConsensusError, Message, Outbound, Request};
use pbft_core::crypto::signing_key_from_bytes;
use pbft_core::{ClusterConfig, MemoryKeyStore, NodeEntry, NodeId};
use std::collections::VecDeque;

pub const CLIENT_ADDR: &str = "127.0.0.1:8888";

pub fn node_id(i: usize) -> NodeId { NodeId(format!("N{i}")) }

pub fn secret(i: usize) -> Vec<u8> { vec![i as u8 + 1; 32] }

pub fn public(i: usize) -> Vec<u8> {
    signing_key_from_bytes(&secret(i)).unwrap().verifying_key().to_bytes().to_vec()
}

pub fn cluster_config(n: usize, me: usize, base_port: u16) -> ClusterConfig {
    ClusterConfig {
        node_id: node_id(me),
        primary: node_id(0),
        nodes: (0..n).map(|i| NodeEntry { id: node_id(i), addr: format!("127.0.0.1:{}", base_port as usize + i) }).collect(),
        client_addr: CLIENT_ADDR.into(),
        ..ClusterConfig::default()
    }
}

pub fn key_store(n: usize, me: usize) -> MemoryKeyStore {
    let mut keys = MemoryKeyStore::new();
    for i in 0..n { keys = keys.with_public(node_id(i), public(i)); }
    keys.with_keypair(node_id(me), secret(me), public(me))
}

pub fn request(id: u64, content: &str) -> Request {
    Request { id, content: content.into(), client_addr: CLIENT_ADDR.into(), timestamp: 1_700_000_000_000 + id as i64 }
}

pub struct Delivery {
    pub to: usize,
    pub frame: Vec<u8>,
}

/// Whole cluster in one thread. Frames are delivered in FIFO order, so every run is
/// reproducible; `drop_from`/`drop_to` model silent nodes and lost links.
pub struct Harness {
    pub nodes: Vec<ConsensusEngine>,
    pub queue: VecDeque<Delivery>,
    pub replies: Vec<(usize, String)>,
    pub rejected: Vec<(usize, ConsensusError)>,
    pub silent: Vec<usize>,
    pub duplicate: bool,
}

impl Harness {
    pub fn new(n: usize) -> Self {
        let nodes = (0..n)
            .map(|me| ConsensusEngine::new(&cluster_config(n, me, 9000), &key_store(n, me)).unwrap())
            .collect();
        Self { nodes, queue: VecDeque::new(), replies: Vec::new(), rejected: Vec::new(), silent: Vec::new(), duplicate: false }
    }

    pub fn submit(&mut self, request: Request) {
        let frame = Message::Request(request).encode().unwrap();
        self.queue.push_back(Delivery { to: 0, frame });
    }

    pub fn deliver(&mut self, to: usize, frame: &[u8]) {
        match self.nodes[to].handle_incoming(frame) {
            Ok(actions) => self.enqueue(to, actions),
            Err(e) => self.rejected.push((to, e)),
        }
    }

    fn enqueue(&mut self, from: usize, actions: Vec<Outbound>) {
        if self.silent.contains(&from) { return; }
        for action in actions {
            match action {
                Outbound::Broadcast { frame, .. } => {
                    for to in (0..self.nodes.len()).filter(|to| *to != from && !self.silent.contains(to)) {
                        if self.duplicate {
                            self.queue.push_back(Delivery { to, frame: frame.clone() });
                        }
                        self.queue.push_back(Delivery { to, frame: frame.clone() });
                    }
                }
                Outbound::Reply { client_addr, text } => {
                    assert_eq!(client_addr, CLIENT_ADDR);
                    self.replies.push((from, text));
                }
            }
        }
    }

    pub fn run(&mut self) {
        while let Some(d) = self.queue.pop_front() {
            self.deliver(d.to, &d.frame);
        }
    }

    pub fn ledgers(&self) -> Vec<Vec<String>> { self.nodes.iter().map(|n| n.ledger()).collect() }

    pub fn replies_from(&self, node: usize) -> usize { self.replies.iter().filter(|(from, _)| *from == node).count() }
}
