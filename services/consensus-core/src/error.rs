use crate::message::Command;
use crate::quorum::QuorumError;
use pbft_core::{CryptoError, Digest, KeyStoreError, NodeId};
use thiserror::Error;

/// Malformed wire frame. The message is dropped before touching any state.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame of {0} bytes is shorter than the command tag")]
    Truncated(usize),
    #[error("unknown command tag {0:?}")]
    UnknownCommand(String),
    #[error("malformed {command} payload: {source}")]
    Payload { command: Command, source: serde_json::Error },
}

/// A well-formed message that fails a phase predicate. Dropped without reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("client requests are only accepted by the primary")]
    NotPrimary,
    #[error("the primary does not accept pre-prepares")]
    NotBackup,
    #[error("request {0} is already pooled")]
    DuplicateRequest(Digest),
    #[error("digest mismatch: claimed {claimed}, computed {computed}")]
    DigestMismatch { claimed: Digest, computed: Digest },
    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },
    #[error("signature from {0} does not verify")]
    InvalidSignature(NodeId),
    #[error("sender {0} is not in the node table")]
    UnknownSender(NodeId),
    #[error("vote claims to come from this node")]
    SelfVote,
    #[error("the primary never sends prepares")]
    PrepareFromPrimary,
    #[error("digest {0} is not in the message pool")]
    UnknownDigest(Digest),
    #[error("digest {0} has no prepare votes")]
    NotPrepared(Digest),
}

/// The node cannot take part in the protocol at all.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("node {0} is not in the node table")]
    UnknownSelf(NodeId),
    #[error("private key of {0} does not match its published public key")]
    KeyMismatch(NodeId),
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Quorum(#[from] QuorumError),
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl ConsensusError {
    pub fn validation(&self) -> Option<&ValidationError> {
        match self { ConsensusError::Validation(v) => Some(v), _ => None }
    }
}
