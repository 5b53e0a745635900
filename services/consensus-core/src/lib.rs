//! PBFT consensus service: a fixed cluster with one primary that orders client requests
//! through Pre-Prepare, Prepare and Commit and replies once per committing node.

pub mod client;
pub mod engine;
pub mod error;
pub mod message;
pub mod metrics;
pub mod node;
pub mod quorum;
pub mod transport;

pub use client::{serve_replies, Client};
pub use engine::{ConsensusEngine, Outbound};
pub use error::{ConsensusError, DecodeError, InternalError, ValidationError};
pub use message::{Command, Message, PrePrepare, Request, Vote};
pub use node::NodeRunner;
pub use quorum::{QuorumConfig, QuorumError, QuorumTracker};
pub use transport::{MemoryTransport, TcpTransport, Transport, TransportError};
