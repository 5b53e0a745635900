use crate::message::{Message, Request};
use crate::node::ACCEPT_BACKOFF;
use crate::transport::{read_frame, Transport};
use pbft_core::ClusterConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Submits requests to the primary. Replies arrive asynchronously on `reply_addr`, one per
/// node that commits the request.
pub struct Client {
    primary_addr: String,
    reply_addr: String,
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(primary_addr: impl Into<String>, reply_addr: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self { primary_addr: primary_addr.into(), reply_addr: reply_addr.into(), transport }
    }

    pub fn from_config(cfg: &ClusterConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let primary_addr = cfg
            .addr_of(&cfg.primary)
            .ok_or_else(|| anyhow::anyhow!("primary {} has no address", cfg.primary))?;
        Ok(Self::new(primary_addr, cfg.client_addr.clone(), transport))
    }

    pub fn reply_addr(&self) -> &str { &self.reply_addr }

    /// Stamps and sends one request; returns it so callers can match replies by digest.
    pub async fn submit(&self, id: u64, content: impl Into<String>) -> anyhow::Result<Request> {
        let request = Request::new(id, content, self.reply_addr.clone());
        let frame = Message::Request(request.clone()).encode()?;
        self.transport.send(&self.primary_addr, frame).await?;
        info!(request_id = id, digest = %request.digest(), primary = %self.primary_addr, "request submitted");
        Ok(request)
    }
}

/// Collects textual replies arriving on `listener`. The accept loop ends once the returned
/// receiver is dropped.
pub fn serve_replies(listener: TcpListener) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = tx.closed() => return,
                res = listener.accept() => res,
            };
            let (mut socket, remote) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "reply accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let reply_tx = tx.clone();
            tokio::spawn(async move {
                match read_frame(&mut socket).await {
                    Ok(buf) => {
                        let text = String::from_utf8_lossy(&buf).into_owned();
                        info!(%remote, reply = %text, "reply received");
                        let _ = reply_tx.send(text);
                    }
                    Err(e) => warn!(%remote, error = %e, "reply read failed"),
                }
            });
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[tokio::test]
    async fn submit_sends_request_frame_to_primary() {
        let transport = Arc::new(MemoryTransport::new());
        let mut primary = transport.register("127.0.0.1:8000");
        let client = Client::from_config(&ClusterConfig::default(), transport.clone()).unwrap();
        let sent = client.submit(9, "op").await.unwrap();
        let frame = primary.recv().await.unwrap();
        match Message::decode(&frame).unwrap() {
            Message::Request(r) => {
                assert_eq!(r, sent);
                assert_eq!(r.client_addr, "127.0.0.1:8888");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_to_unreachable_primary_errors() {
        let client = Client::new("nowhere", "me", Arc::new(MemoryTransport::new()));
        assert!(client.submit(1, "x").await.is_err());
    }

    #[tokio::test]
    async fn replies_are_forwarded_as_text() {
        use crate::transport::TcpTransport;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut replies = serve_replies(listener);
        TcpTransport.send(&addr, b"N1 committed request 1".to_vec()).await.unwrap();
        assert_eq!(replies.recv().await.unwrap(), "N1 committed request 1");
    }

    #[tokio::test]
    async fn dropping_the_receiver_closes_the_reply_listener() {
        use std::time::Duration;
        use tokio::net::TcpStream;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(serve_replies(listener));
        tokio::time::timeout(Duration::from_secs(5), async {
            while TcpStream::connect(addr).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reply listener still accepting after its receiver was dropped");
    }
}
