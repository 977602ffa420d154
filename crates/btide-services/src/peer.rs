//! Peer list: the remote nodes this node knows about, capped at `max_peers`.

use std::net::SocketAddr;
use std::time::Instant;

/// A known peer, identified by address and port.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub addr: SocketAddr,
    /// When the peer was added to the list.
    pub added: Instant,
}

/// Insertion-ordered peer collection with a fixed capacity.
#[derive(Debug)]
pub struct PeerList {
    peers: Vec<PeerEntry>,
    max_peers: usize,
}

impl PeerList {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: Vec::new(),
            max_peers,
        }
    }

    /// Add a peer. Fails when the list is full or the address is present.
    pub fn add(&mut self, addr: SocketAddr) -> Result<&PeerEntry, PeerError> {
        if self.find(&addr).is_some() {
            return Err(PeerError::AlreadyKnown(addr));
        }
        if self.is_full() {
            return Err(PeerError::Full(self.max_peers));
        }
        tracing::info!(peer = %addr, count = self.peers.len() + 1, "peer added");
        self.peers.push(PeerEntry {
            addr,
            added: Instant::now(),
        });
        Ok(&self.peers[self.peers.len() - 1])
    }

    pub fn find(&self, addr: &SocketAddr) -> Option<&PeerEntry> {
        self.peers.iter().find(|p| p.addr == *addr)
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Result<PeerEntry, PeerError> {
        let pos = self
            .peers
            .iter()
            .position(|p| p.addr == *addr)
            .ok_or(PeerError::Unknown(*addr))?;
        tracing::info!(peer = %addr, "peer removed");
        Ok(self.peers.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.max_peers
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// `<n>. <ip>:<port>` per peer.
    pub fn summary_lines(&self) -> Vec<String> {
        self.peers
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.addr))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer list is full ({0} peers)")]
    Full(usize),
    #[error("peer {0} is already known")]
    AlreadyKnown(SocketAddr),
    #[error("peer {0} is not known")]
    Unknown(SocketAddr),
}
