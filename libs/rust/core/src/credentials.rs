//! Read-only access to node key material.
//!
//! Keys are provisioned out of band. A node only ever reads them: its own private key once at
//! startup and the public key of every cluster member.

use crate::NodeId;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind { Private, Public }

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { KeyKind::Private => f.write_str("private"), KeyKind::Public => f.write_str("public") }
    }
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("no {kind} key for node {node}")]
    Missing { node: NodeId, kind: KeyKind },
    #[error("failed reading key file {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("key file {} is not valid hex: {source}", .path.display())]
    Encoding { path: PathBuf, source: hex::FromHexError },
}

pub trait KeyStore: Send + Sync {
    fn private_key(&self, node: &NodeId) -> Result<Vec<u8>, KeyStoreError>;
    fn public_key(&self, node: &NodeId) -> Result<Vec<u8>, KeyStoreError>;
}

/// Hex-encoded keys laid out as `<root>/<id>/<id>_ED25519_PRIV` and `<root>/<id>/<id>_ED25519_PUB`.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    root: PathBuf,
}

impl FileKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn root(&self) -> &Path { &self.root }

    pub fn key_path(&self, node: &NodeId, kind: KeyKind) -> PathBuf {
        let suffix = match kind { KeyKind::Private => "ED25519_PRIV", KeyKind::Public => "ED25519_PUB" };
        self.root.join(node.as_str()).join(format!("{node}_{suffix}"))
    }

    fn read(&self, node: &NodeId, kind: KeyKind) -> Result<Vec<u8>, KeyStoreError> {
        let path = self.key_path(node, kind);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyStoreError::Missing { node: node.clone(), kind });
            }
            Err(source) => return Err(KeyStoreError::Io { path, source }),
        };
        hex::decode(text.trim()).map_err(|source| KeyStoreError::Encoding { path, source })
    }
}

impl KeyStore for FileKeyStore {
    fn private_key(&self, node: &NodeId) -> Result<Vec<u8>, KeyStoreError> { self.read(node, KeyKind::Private) }
    fn public_key(&self, node: &NodeId) -> Result<Vec<u8>, KeyStoreError> { self.read(node, KeyKind::Public) }
}

/// In-process key table. A node normally holds only its own private key.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    private: HashMap<NodeId, Vec<u8>>,
    public: HashMap<NodeId, Vec<u8>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_public(mut self, node: impl Into<NodeId>, key: Vec<u8>) -> Self {
        self.public.insert(node.into(), key);
        self
    }

    pub fn with_keypair(mut self, node: impl Into<NodeId>, private: Vec<u8>, public: Vec<u8>) -> Self {
        let node = node.into();
        self.private.insert(node.clone(), private);
        self.public.insert(node, public);
        self
    }
}

impl KeyStore for MemoryKeyStore {
    fn private_key(&self, node: &NodeId) -> Result<Vec<u8>, KeyStoreError> {
        self.private.get(node).cloned().ok_or_else(|| KeyStoreError::Missing { node: node.clone(), kind: KeyKind::Private })
    }

    fn public_key(&self, node: &NodeId) -> Result<Vec<u8>, KeyStoreError> {
        self.public.get(node).cloned().ok_or_else(|| KeyStoreError::Missing { node: node.clone(), kind: KeyKind::Public })
    }
}
