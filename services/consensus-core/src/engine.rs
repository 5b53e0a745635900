//! Per-node PBFT state machine.
//!
//! `handle_incoming` never performs I/O. Each handler validates, mutates the node state under
//! one exclusive lock and returns the [`Outbound`] actions to perform once the lock is
//! released. Record-vote, threshold check and flag flip happen inside the same critical
//! section, so a Commit is broadcast and a request committed at most once per digest no matter
//! how Prepare/Commit deliveries interleave.

use crate::error::{ConsensusError, InternalError, ValidationError};
use crate::message::{Command, Message, PrePrepare, Request, Vote};
use crate::metrics::ConsensusMetrics;
use crate::quorum::{QuorumConfig, QuorumTracker};
use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::Mutex;
use pbft_core::crypto::{sign, signing_key_from_bytes, verify, verifying_key_from_bytes};
use pbft_core::{ClusterConfig, Digest, KeyStore, NodeEntry, NodeId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// Side effect requested by a handler, performed by the node runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send the same frame to every other node.
    Broadcast { command: Command, frame: Vec<u8> },
    /// Textual reply to the client that submitted the request.
    Reply { client_addr: String, text: String },
}

#[derive(Debug, Default)]
struct NodeState {
    sequence_id: u64,
    message_pool: HashMap<Digest, Request>,
    prepare_votes: QuorumTracker,
    commit_votes: QuorumTracker,
    commit_broadcast: HashSet<Digest>,
    replied: HashSet<Digest>,
    ledger: Vec<String>,
}

pub struct ConsensusEngine {
    node_id: NodeId,
    primary: NodeId,
    peers: Vec<NodeEntry>,
    signing_key: SigningKey,
    public_keys: HashMap<NodeId, VerifyingKey>,
    quorum: QuorumConfig,
    state: Mutex<NodeState>,
    metrics: ConsensusMetrics,
}

impl ConsensusEngine {
    /// Loads this node's private key and every member's public key. Any failure here is fatal:
    /// a node that cannot sign or verify must not join the cluster.
    pub fn new(cfg: &ClusterConfig, keys: &dyn KeyStore) -> Result<Self, ConsensusError> {
        let node_id = cfg.node_id.clone();
        if cfg.addr_of(&node_id).is_none() {
            return Err(InternalError::UnknownSelf(node_id).into());
        }
        let quorum = QuorumConfig::new(cfg.nodes.len()).map_err(InternalError::from)?;

        let mut public_keys = HashMap::with_capacity(cfg.nodes.len());
        for entry in &cfg.nodes {
            let raw = keys.public_key(&entry.id).map_err(InternalError::from)?;
            let key = verifying_key_from_bytes(&raw).map_err(InternalError::from)?;
            public_keys.insert(entry.id.clone(), key);
        }
        let raw = keys.private_key(&node_id).map_err(InternalError::from)?;
        let signing_key = signing_key_from_bytes(&raw).map_err(InternalError::from)?;
        if public_keys.get(&node_id) != Some(&signing_key.verifying_key()) {
            return Err(InternalError::KeyMismatch(node_id).into());
        }

        let peers = cfg.nodes.iter().filter(|n| n.id != node_id).cloned().collect();
        info!(node = %node_id, primary = %cfg.primary, nodes = cfg.nodes.len(), f = quorum.fault_tolerance(), "consensus engine ready");
        Ok(Self {
            node_id,
            primary: cfg.primary.clone(),
            peers,
            signing_key,
            public_keys,
            quorum,
            state: Mutex::new(NodeState::default()),
            metrics: ConsensusMetrics::new(),
        })
    }

    /// Decodes one frame and runs the matching phase handler. Errors mean the frame was
    /// dropped with no state change; they are logged here and returned for the caller's benefit.
    #[instrument(skip(self, frame), fields(node = %self.node_id), level = "debug")]
    pub fn handle_incoming(&self, frame: &[u8]) -> Result<Vec<Outbound>, ConsensusError> {
        let msg = match Message::decode(frame) {
            Ok(m) => m,
            Err(e) => {
                self.metrics.message(None);
                self.metrics.rejected(None);
                warn!(error = %e, len = frame.len(), "dropping undecodable frame");
                return Err(e.into());
            }
        };
        let command = msg.command();
        self.metrics.message(Some(command));
        let result = match msg {
            Message::Request(r) => self.on_client_request(r),
            Message::PrePrepare(p) => self.on_pre_prepare(p),
            Message::Prepare(v) => self.on_prepare(v),
            Message::Commit(v) => self.on_commit(v),
        };
        if let Err(e) = &result {
            self.metrics.rejected(Some(command));
            warn!(%command, reason = %e, "message rejected");
        }
        result
    }

    fn on_client_request(&self, request: Request) -> Result<Vec<Outbound>, ConsensusError> {
        if !self.is_primary() { return Err(ValidationError::NotPrimary.into()); }
        let digest = request.digest();
        let sequence_id = {
            let mut st = self.state.lock();
            if st.message_pool.contains_key(&digest) {
                return Err(ValidationError::DuplicateRequest(digest).into());
            }
            st.sequence_id += 1;
            st.message_pool.insert(digest, request.clone());
            st.sequence_id
        };
        info!(request_id = request.id, seq = sequence_id, %digest, "client request pooled, sending pre-prepare");
        self.metrics.pre_prepared();
        let signature = sign(digest.as_bytes(), &self.signing_key);
        let pp = PrePrepare { request, digest, sequence_id, signature };
        Ok(vec![self.broadcast(Message::PrePrepare(pp))?])
    }

    fn on_pre_prepare(&self, pp: PrePrepare) -> Result<Vec<Outbound>, ConsensusError> {
        if self.is_primary() { return Err(ValidationError::NotBackup.into()); }
        let computed = pp.request.digest();
        if computed != pp.digest {
            return Err(ValidationError::DigestMismatch { claimed: pp.digest, computed }.into());
        }
        let primary_key = self.sender_key(&self.primary)?;
        if !verify(pp.digest.as_bytes(), &pp.signature, primary_key) {
            return Err(ValidationError::InvalidSignature(self.primary.clone()).into());
        }
        {
            let mut st = self.state.lock();
            let expected = st.sequence_id + 1;
            if pp.sequence_id != expected {
                return Err(ValidationError::SequenceMismatch { expected, got: pp.sequence_id }.into());
            }
            st.sequence_id = pp.sequence_id;
            st.message_pool.insert(pp.digest, pp.request);
        }
        info!(seq = pp.sequence_id, digest = %pp.digest, "pre-prepare accepted, sending prepare");
        self.metrics.pre_prepared();
        Ok(vec![self.broadcast(Message::Prepare(self.vote(pp.digest, pp.sequence_id)))?])
    }

    fn on_prepare(&self, vote: Vote) -> Result<Vec<Outbound>, ConsensusError> {
        if vote.node_id == self.primary { return Err(ValidationError::PrepareFromPrimary.into()); }
        self.check_vote_signature(&vote)?;
        let threshold = self.quorum.prepare_threshold(self.is_primary());
        let (send_commit, reply) = {
            let mut st = self.state.lock();
            if !st.message_pool.contains_key(&vote.digest) {
                return Err(ValidationError::UnknownDigest(vote.digest).into());
            }
            Self::check_sequence(&st, vote.sequence_id)?;
            st.prepare_votes.record_vote(vote.digest, vote.node_id.clone());
            let count = st.prepare_votes.count(&vote.digest);
            debug!(from = %vote.node_id, digest = %vote.digest, count, threshold, "prepare recorded");
            if count >= threshold && st.commit_broadcast.insert(vote.digest) {
                // commits that overtook our own prepare quorum may already satisfy the commit phase
                (true, self.try_commit(&mut st, &vote.digest))
            } else {
                (false, None)
            }
        };
        let mut out = Vec::new();
        if send_commit {
            info!(seq = vote.sequence_id, digest = %vote.digest, "prepare quorum reached, sending commit");
            self.metrics.commit_broadcast();
            out.push(self.broadcast(Message::Commit(self.vote(vote.digest, vote.sequence_id)))?);
        }
        out.extend(reply);
        Ok(out)
    }

    fn on_commit(&self, vote: Vote) -> Result<Vec<Outbound>, ConsensusError> {
        self.check_vote_signature(&vote)?;
        let mut st = self.state.lock();
        if !st.prepare_votes.exists(&vote.digest) {
            return Err(ValidationError::NotPrepared(vote.digest).into());
        }
        Self::check_sequence(&st, vote.sequence_id)?;
        st.commit_votes.record_vote(vote.digest, vote.node_id.clone());
        debug!(from = %vote.node_id, digest = %vote.digest, count = st.commit_votes.count(&vote.digest), "commit recorded");
        Ok(self.try_commit(&mut st, &vote.digest).into_iter().collect())
    }

    /// Commits `digest` once: needs the commit quorum, our own Commit already broadcast, and no
    /// earlier reply. Must run under the state lock.
    fn try_commit(&self, st: &mut NodeState, digest: &Digest) -> Option<Outbound> {
        if st.commit_votes.count(digest) < self.quorum.commit_threshold()
            || !st.commit_broadcast.contains(digest)
            || st.replied.contains(digest)
        {
            return None;
        }
        let request = st.message_pool.get(digest)?.clone();
        st.replied.insert(*digest);
        st.ledger.push(request.content.clone());
        let seq = st.sequence_id;
        info!(request_id = request.id, seq, %digest, ledger_len = st.ledger.len(), "request committed, replying to client");
        self.metrics.committed();
        let text = format!(
            "{} committed request {} at sequence {}: {}",
            self.node_id, request.id, seq, request.content
        );
        Some(Outbound::Reply { client_addr: request.client_addr, text })
    }

    fn check_sequence(st: &NodeState, got: u64) -> Result<(), ValidationError> {
        if got != st.sequence_id {
            return Err(ValidationError::SequenceMismatch { expected: st.sequence_id, got });
        }
        Ok(())
    }

    fn check_vote_signature(&self, vote: &Vote) -> Result<(), ValidationError> {
        if vote.node_id == self.node_id { return Err(ValidationError::SelfVote); }
        let key = self.sender_key(&vote.node_id)?;
        if !verify(vote.digest.as_bytes(), &vote.signature, key) {
            return Err(ValidationError::InvalidSignature(vote.node_id.clone()));
        }
        Ok(())
    }

    fn sender_key(&self, node: &NodeId) -> Result<&VerifyingKey, ValidationError> {
        self.public_keys.get(node).ok_or_else(|| ValidationError::UnknownSender(node.clone()))
    }

    fn vote(&self, digest: Digest, sequence_id: u64) -> Vote {
        let signature = sign(digest.as_bytes(), &self.signing_key);
        Vote { digest, sequence_id, node_id: self.node_id.clone(), signature }
    }

    fn broadcast(&self, msg: Message) -> Result<Outbound, InternalError> {
        Ok(Outbound::Broadcast { command: msg.command(), frame: msg.encode()? })
    }

    pub fn node_id(&self) -> &NodeId { &self.node_id }

    pub fn primary(&self) -> &NodeId { &self.primary }

    pub fn is_primary(&self) -> bool { self.node_id == self.primary }

    /// Every other node in the address table.
    pub fn peers(&self) -> &[NodeEntry] { &self.peers }

    pub fn quorum(&self) -> QuorumConfig { self.quorum }

    pub fn sequence_id(&self) -> u64 { self.state.lock().sequence_id }

    pub fn ledger(&self) -> Vec<String> { self.state.lock().ledger.clone() }

    pub fn pooled_request(&self, digest: &Digest) -> Option<Request> {
        self.state.lock().message_pool.get(digest).cloned()
    }

    pub fn prepare_votes(&self, digest: &Digest) -> usize { self.state.lock().prepare_votes.count(digest) }

    pub fn commit_votes(&self, digest: &Digest) -> usize { self.state.lock().commit_votes.count(digest) }

    pub fn commit_broadcast(&self, digest: &Digest) -> bool { self.state.lock().commit_broadcast.contains(digest) }

    pub fn replied(&self, digest: &Digest) -> bool { self.state.lock().replied.contains(digest) }
}
