//! Vote accounting and quorum thresholds.
//!
//! A node never receives its own broadcasts, so every counted vote comes from a peer.
//! With f = ⌊(N-1)/3⌋:
//! - the primary emits no Prepare and needs 2f Prepares from backups;
//! - a backup counts its own Prepare implicitly and needs 2f-1 from the other backups;
//! - every node counts its own Commit implicitly and needs 2f Commits from peers (2f+1 total).

use pbft_core::{Digest, NodeId};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Digest → set of distinct voters. Re-recording a voter never raises the count.
#[derive(Debug, Default, Clone)]
pub struct QuorumTracker {
    votes: HashMap<Digest, HashSet<NodeId>>,
}

impl QuorumTracker {
    pub fn new() -> Self { Self::default() }

    /// Returns `true` when the vote was not seen before.
    pub fn record_vote(&mut self, digest: Digest, node: NodeId) -> bool {
        self.votes.entry(digest).or_default().insert(node)
    }

    pub fn count(&self, digest: &Digest) -> usize {
        self.votes.get(digest).map(HashSet::len).unwrap_or(0)
    }

    pub fn exists(&self, digest: &Digest) -> bool { self.votes.contains_key(digest) }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuorumError {
    #[error("a cluster of {0} nodes tolerates no faults; at least 4 are required")]
    TooFewNodes(usize),
    #[error("{phase} threshold {threshold} exceeds the {honest} honest peers left after {f} faults")]
    Unreachable { phase: &'static str, threshold: usize, honest: usize, f: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumConfig {
    node_count: usize,
    f: usize,
}

impl QuorumConfig {
    pub fn new(node_count: usize) -> Result<Self, QuorumError> {
        if node_count < 4 { return Err(QuorumError::TooFewNodes(node_count)); }
        let cfg = Self { node_count, f: (node_count - 1) / 3 };
        cfg.check_reachable()?;
        Ok(cfg)
    }

    pub fn node_count(&self) -> usize { self.node_count }

    pub fn fault_tolerance(&self) -> usize { self.f }

    pub fn prepare_threshold(&self, is_primary: bool) -> usize {
        if is_primary { 2 * self.f } else { 2 * self.f - 1 }
    }

    pub fn commit_threshold(&self) -> usize { 2 * self.f }

    // With f faulty nodes none of which is the counting node or the primary, the honest
    // voters each threshold can draw on are: backups seen by the primary (N-1-f), other
    // backups seen by a backup (N-2-f), and all peers for commits (N-1-f).
    fn check_reachable(&self) -> Result<(), QuorumError> {
        let (n, f) = (self.node_count, self.f);
        let checks = [
            ("primary prepare", self.prepare_threshold(true), n - 1 - f),
            ("backup prepare", self.prepare_threshold(false), n - 2 - f),
            ("commit", self.commit_threshold(), n - 1 - f),
        ];
        for (phase, threshold, honest) in checks {
            if threshold == 0 || threshold > honest {
                return Err(QuorumError::Unreachable { phase, threshold, honest, f });
            }
        }
        Ok(())
    }
}
