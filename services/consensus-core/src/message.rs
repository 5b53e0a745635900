//! Wire codec.
//!
//! A frame is a 12-byte ASCII command tag, zero padded, followed by the JSON payload.
//! Replies to clients are plain text and carry no tag.

use crate::error::DecodeError;
use pbft_core::{Digest, NodeId};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

pub const TAG_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command { Request, PrePrepare, Prepare, Commit }

impl Command {
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Request => "REQUEST",
            Command::PrePrepare => "PRE-PREPARE",
            Command::Prepare => "PREPARE",
            Command::Commit => "COMMIT",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "REQUEST" => Some(Command::Request),
            "PRE-PREPARE" => Some(Command::PrePrepare),
            "PREPARE" => Some(Command::Prepare),
            "COMMIT" => Some(Command::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.tag()) }
}

/// Client operation. Immutable once stamped by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub content: String,
    pub client_addr: String,
    /// Unix millis at submission.
    pub timestamp: i64,
}

impl Request {
    pub fn new(id: u64, content: impl Into<String>, client_addr: impl Into<String>) -> Self {
        Self { id, content: content.into(), client_addr: client_addr.into(), timestamp: chrono::Utc::now().timestamp_millis() }
    }

    /// SHA-256 over a fixed field order with length-prefixed strings, so the value does not
    /// depend on how the request travelled over the wire.
    pub fn digest(&self) -> Digest {
        let mut h = Sha256::new();
        h.update(self.id.to_be_bytes());
        h.update((self.content.len() as u64).to_be_bytes());
        h.update(self.content.as_bytes());
        h.update((self.client_addr.len() as u64).to_be_bytes());
        h.update(self.client_addr.as_bytes());
        h.update(self.timestamp.to_be_bytes());
        Digest::from_hasher(h)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub request: Request,
    pub digest: Digest,
    pub sequence_id: u64,
    /// Primary's signature over the digest bytes.
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// Body shared by PREPARE and COMMIT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub digest: Digest,
    pub sequence_id: u64,
    pub node_id: NodeId,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    PrePrepare(PrePrepare),
    Prepare(Vote),
    Commit(Vote),
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Request(_) => Command::Request,
            Message::PrePrepare(_) => Command::PrePrepare,
            Message::Prepare(_) => Command::Prepare,
            Message::Commit(_) => Command::Commit,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let payload = match self {
            Message::Request(r) => serde_json::to_vec(r)?,
            Message::PrePrepare(p) => serde_json::to_vec(p)?,
            Message::Prepare(v) | Message::Commit(v) => serde_json::to_vec(v)?,
        };
        Ok(frame(self.command(), &payload))
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < TAG_LEN { return Err(DecodeError::Truncated(frame.len())); }
        let (tag, payload) = frame.split_at(TAG_LEN);
        let end = tag.iter().position(|b| *b == 0).unwrap_or(TAG_LEN);
        let tag = String::from_utf8_lossy(&tag[..end]);
        let command = Command::from_tag(&tag).ok_or_else(|| DecodeError::UnknownCommand(tag.to_string()))?;
        let bad = |source| DecodeError::Payload { command, source };
        Ok(match command {
            Command::Request => Message::Request(serde_json::from_slice(payload).map_err(bad)?),
            Command::PrePrepare => Message::PrePrepare(serde_json::from_slice(payload).map_err(bad)?),
            Command::Prepare => Message::Prepare(serde_json::from_slice(payload).map_err(bad)?),
            Command::Commit => Message::Commit(serde_json::from_slice(payload).map_err(bad)?),
        })
    }
}

pub fn frame(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TAG_LEN + payload.len());
    out.extend_from_slice(command.tag().as_bytes());
    out.resize(TAG_LEN, 0);
    out.extend_from_slice(payload);
    out
}
