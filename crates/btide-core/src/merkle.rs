//! Merkle tree over a package's chunks.
//!
//! The tree is a flat array of `2n - 1` hex digests for `n` leaves:
//!
//!   internal nodes  0 ..= n-2   (root at 0)
//!   leaves          n-1 ..= 2n-2, leaf `i` is chunk `i`
//!   children(i)     2i+1, 2i+2
//!
//! This is the heap layout. It is a proper binary tree for every `n`: each
//! internal index has both children in range. When `n` is not a power of two
//! the leaves sit on two depths and a left-to-right walk of the tree visits
//! them rotated relative to chunk order, so anything that reports leaves
//! reports them by index (chunk order), never by walk order.
//!
//! Trees are built from one of two sources:
//!   - recorded chunk hashes in the descriptor ([`MerkleTree::from_chunk_hashes`])
//!   - the bytes actually on disk ([`MerkleTree::from_file`])

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use crate::bpkg::PackageDescriptor;
use crate::crypto::{combine, Hasher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    nodes: Vec<String>,
    n_leaves: usize,
}

impl MerkleTree {
    /// Build from the chunk hashes recorded in the manifest. No I/O.
    pub fn from_chunk_hashes(descriptor: &PackageDescriptor) -> Result<Self, MerkleError> {
        Self::from_leaves(descriptor.chunks.iter().map(|c| c.hash.clone()).collect())
    }

    /// Build from the target file's bytes.
    ///
    /// The file is read sequentially: leaf `i` hashes the next `chunk_sizes[i]`
    /// bytes after leaf `i - 1`. Offsets in the manifest are not consulted, so
    /// sizes must be given in file order.
    pub fn from_file(
        descriptor: &PackageDescriptor,
        chunk_sizes: &[u32],
    ) -> Result<Self, MerkleError> {
        let path = descriptor.target_path();
        let file = File::open(&path).map_err(|e| MerkleError::Open(path.clone(), e))?;
        let tree = Self::from_reader(BufReader::new(file), chunk_sizes)
            .map_err(|e| MerkleError::Read(path.clone(), e))?;
        tracing::debug!(path = %path.display(), leaves = tree.n_leaves, "truth tree built");
        Ok(tree)
    }

    /// Build from any byte stream, hashing `chunk_sizes[i]` bytes per leaf.
    ///
    /// A short read at end of stream hashes whatever bytes were present.
    pub fn from_reader<R: Read>(mut reader: R, chunk_sizes: &[u32]) -> std::io::Result<Self> {
        let mut leaves = Vec::with_capacity(chunk_sizes.len());
        for (i, &size) in chunk_sizes.iter().enumerate() {
            let mut hasher = Hasher::new();
            let read = std::io::copy(&mut reader.by_ref().take(u64::from(size)), &mut hasher)?;
            if read < u64::from(size) {
                tracing::debug!(chunk = i, expected = size, read, "short read");
            }
            leaves.push(hasher.finalize_hex());
        }
        Self::from_leaves(leaves)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    }

    /// Build from leaf digests in chunk order, folding internal nodes bottom-up.
    pub fn from_leaves(leaves: Vec<String>) -> Result<Self, MerkleError> {
        let n_leaves = leaves.len();
        if n_leaves == 0 {
            return Err(MerkleError::Empty);
        }

        let mut nodes = Vec::with_capacity(2 * n_leaves - 1);
        nodes.resize(n_leaves - 1, String::new());
        nodes.extend(leaves);

        for i in (0..n_leaves - 1).rev() {
            let right = nodes.get(2 * i + 2).map(String::as_str).unwrap_or("");
            let hash = combine(&nodes[2 * i + 1], right);
            nodes[i] = hash;
        }

        Ok(Self { nodes, n_leaves })
    }

    pub fn root(&self) -> &str {
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> Option<&str> {
        self.nodes.get(index).map(String::as_str)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    /// Total node count, always `2 * n_leaves - 1`.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the first leaf.
    pub fn leaf_offset(&self) -> usize {
        self.n_leaves - 1
    }

    /// Hash of leaf `chunk` (chunk order).
    pub fn leaf(&self, chunk: usize) -> Option<&str> {
        if chunk >= self.n_leaves {
            return None;
        }
        self.node(self.leaf_offset() + chunk)
    }

    pub fn is_leaf(&self, index: usize) -> bool {
        index >= self.leaf_offset() && index < self.nodes.len()
    }

    /// Child indices of an internal node. `None` for leaves.
    pub fn children(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.leaf_offset() {
            return None;
        }
        Some((2 * index + 1, 2 * index + 2))
    }

    /// First node index holding `hash`.
    pub fn position(&self, hash: &str) -> Option<usize> {
        self.nodes.iter().position(|h| h == hash)
    }

    /// Leaf hashes in the subtree rooted at `index`, in chunk order.
    pub fn leaves_under(&self, index: usize) -> Vec<&str> {
        let mut leaves = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            match self.children(i) {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None if i < self.nodes.len() => leaves.push(i),
                None => {}
            }
        }
        leaves.sort_unstable();
        leaves.into_iter().map(|i| self.nodes[i].as_str()).collect()
    }
}

impl fmt::Display for MerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hash) in self.nodes.iter().enumerate() {
            writeln!(f, "Node {i} Hash: {hash}")?;
        }
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MerkleError {
    #[error("cannot build a tree with no leaves")]
    Empty,
    #[error("failed to open data file {0}: {1}")]
    Open(PathBuf, std::io::Error),
    #[error("failed to read data file {0}: {1}")]
    Read(PathBuf, std::io::Error),
}
