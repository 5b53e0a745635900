mod common;

use common::{cluster_config, key_store, CLIENT_ADDR};
use consensus_core::{serve_replies, Client, ConsensusEngine, MemoryTransport, NodeRunner, TcpTransport};
use pbft_core::{ClusterConfig, NodeEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

#[tokio::test(flavor = "current_thread")]
async fn in_memory_cluster_replies_from_every_node() {
    let transport = Arc::new(MemoryTransport::new());
    let mut engines = Vec::new();
    for me in 0..4 {
        let cfg = cluster_config(4, me, 7000);
        let engine = Arc::new(ConsensusEngine::new(&cfg, &key_store(4, me)).unwrap());
        let inbox = transport.register(cfg.addr_of(&cfg.node_id).unwrap());
        NodeRunner::new(engine.clone(), transport.clone()).spawn_inbox(inbox);
        engines.push(engine);
    }
    let mut replies = transport.register(CLIENT_ADDR);
    let client = Client::from_config(&cluster_config(4, 0, 7000), transport.clone()).unwrap();
    client.submit(1, "hello").await.unwrap();

    let mut texts = Vec::new();
    while texts.len() < 4 {
        let frame = timeout(Duration::from_secs(5), replies.recv()).await.expect("reply timeout").unwrap();
        texts.push(String::from_utf8(frame).unwrap());
    }
    for (i, id) in ["N0", "N1", "N2", "N3"].iter().enumerate() {
        assert_eq!(texts.iter().filter(|t| t.starts_with(id)).count(), 1, "{id}");
        assert_eq!(engines[i].ledger(), vec!["hello".to_string()]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_cluster_commits_over_loopback() {
    let mut listeners = Vec::new();
    let mut nodes = Vec::new();
    for i in 0..4 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        nodes.push(NodeEntry { id: common::node_id(i), addr: listener.local_addr().unwrap().to_string() });
        listeners.push(listener);
    }
    let reply_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let reply_addr = reply_listener.local_addr().unwrap().to_string();
    let mut replies = serve_replies(reply_listener);

    let mut engines = Vec::new();
    for (me, listener) in listeners.into_iter().enumerate() {
        let cfg = ClusterConfig { node_id: common::node_id(me), nodes: nodes.clone(), ..cluster_config(4, me, 0) };
        let engine = Arc::new(ConsensusEngine::new(&cfg, &key_store(4, me)).unwrap());
        tokio::spawn(NodeRunner::new(engine.clone(), Arc::new(TcpTransport)).serve(listener));
        engines.push(engine);
    }

    let client = Client::new(nodes[0].addr.clone(), reply_addr, Arc::new(TcpTransport));
    client.submit(1, "hello").await.unwrap();
    let first = timeout(Duration::from_secs(10), replies.recv()).await.expect("no reply").unwrap();
    assert!(first.contains("hello"), "{first}");

    // give the remaining nodes a moment, then check agreement among whoever committed
    tokio::time::sleep(Duration::from_millis(300)).await;
    let committed: Vec<_> = engines.iter().map(|e| e.ledger()).filter(|l| !l.is_empty()).collect();
    assert!(!committed.is_empty());
    assert!(committed.iter().all(|l| l == &vec!["hello".to_string()]));
}
