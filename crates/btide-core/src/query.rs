//! Completeness queries over a loaded package.
//!
//! Every query borrows the descriptor read-only. Trees built along the way
//! are owned by the call and dropped before it returns.
//!
//! A root mismatch between the truth tree (bytes on disk) and the recorded
//! hashes is not an error. It is the normal state of a partial download and
//! only changes what the completeness queries report.

use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;

use crate::bpkg::PackageDescriptor;
use crate::merkle::{MerkleError, MerkleTree};

/// Owned, ordered query output: hash lines or `hash, offset, size` records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult(Vec<String>);

impl QueryResult {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl Deref for QueryResult {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

impl FromIterator<String> for QueryResult {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for QueryResult {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.0 {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Outcome of [`ensure_target_file_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Exists,
    Created,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Exists => f.write_str("File Exists"),
            FileStatus::Created => f.write_str("File Created"),
        }
    }
}

/// Every recorded hash: internal nodes (root first), then chunk hashes.
pub fn all_hashes(descriptor: &PackageDescriptor) -> Result<QueryResult, QueryError> {
    if descriptor.internal_hashes.is_empty() && descriptor.chunks.is_empty() {
        return Err(QueryError::Empty);
    }
    Ok(descriptor
        .internal_hashes
        .iter()
        .cloned()
        .chain(descriptor.chunks.iter().map(|c| c.hash.clone()))
        .collect())
}

/// Check the target file, creating it empty if it does not exist.
///
/// This writes to the filesystem: it provisions the destination that
/// incoming chunks are written into. An existing file is never modified.
pub fn ensure_target_file_exists(
    descriptor: &PackageDescriptor,
) -> Result<FileStatus, QueryError> {
    let path = descriptor.target_path();
    match std::fs::metadata(&path) {
        Ok(_) => Ok(FileStatus::Exists),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map_err(|e| QueryError::Io(path.clone(), e))?;
            tracing::info!(path = %path.display(), "created empty target file");
            Ok(FileStatus::Created)
        }
        Err(e) => Err(QueryError::Io(path, e)),
    }
}

/// Indices of chunks whose on-disk bytes match their recorded hash.
///
/// If the truth root equals the recorded root every chunk is complete.
pub fn completed_chunk_indices(descriptor: &PackageDescriptor) -> Result<Vec<usize>, QueryError> {
    let tree = MerkleTree::from_file(descriptor, &descriptor.chunk_sizes())?;
    if tree.root() == descriptor.recorded_root() {
        return Ok((0..descriptor.chunks.len()).collect());
    }
    let done: Vec<usize> = descriptor
        .chunks
        .iter()
        .enumerate()
        .filter(|(i, chunk)| tree.leaf(*i) == Some(chunk.hash.as_str()))
        .map(|(i, _)| i)
        .collect();
    tracing::debug!(
        ident = %descriptor.identifier,
        completed = done.len(),
        total = descriptor.chunks.len(),
        "root mismatch, checked chunks individually"
    );
    Ok(done)
}

/// Completed chunks as `hash, offset, size` records.
pub fn completed_chunks(descriptor: &PackageDescriptor) -> Result<QueryResult, QueryError> {
    Ok(completed_chunk_indices(descriptor)?
        .into_iter()
        .map(|i| descriptor.chunks[i].record())
        .collect())
}

/// The minimal set of hashes certifying every verified region of the file.
///
/// A node is verified when its truth hash equals the hash recorded for the
/// same position. A verified internal node covers its whole subtree, so its
/// descendants are never reported alongside it. Nodes are visited root first,
/// level by level, which means the highest verifiable ancestor always wins.
pub fn min_completed_hashes(descriptor: &PackageDescriptor) -> Result<QueryResult, QueryError> {
    let tree = MerkleTree::from_file(descriptor, &descriptor.chunk_sizes())?;
    if tree.root() == descriptor.recorded_root() {
        return Ok(QueryResult(vec![tree.root().to_string()]));
    }

    let mut covered = vec![false; tree.len()];
    let mut result = Vec::new();

    for (i, hash) in tree.nodes().iter().enumerate() {
        match tree.children(i) {
            Some((left, right)) => {
                if covered[i] {
                    covered[left] = true;
                    covered[right] = true;
                } else if descriptor.internal_hashes.get(i) == Some(hash) {
                    result.push(hash.clone());
                    covered[left] = true;
                    covered[right] = true;
                }
            }
            None => {
                let chunk = &descriptor.chunks[i - tree.leaf_offset()];
                if !covered[i] && *hash == chunk.hash {
                    result.push(hash.clone());
                }
            }
        }
    }

    Ok(QueryResult(result))
}

/// Chunk hashes under a recorded hash, in chunk order.
///
/// Answers from the manifest alone, so it works over an incomplete file.
pub fn chunk_hashes_from(
    descriptor: &PackageDescriptor,
    hash: &str,
) -> Result<QueryResult, QueryError> {
    let tree = MerkleTree::from_chunk_hashes(descriptor)?;
    let needle = hash.trim().to_ascii_lowercase();
    let index = tree
        .position(&needle)
        .ok_or_else(|| QueryError::NotFound(hash.to_string()))?;
    Ok(tree
        .leaves_under(index)
        .into_iter()
        .map(str::to_string)
        .collect())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("package has no hashes")]
    Empty,
    #[error("{0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("hash not found in the merkle tree: {0}")]
    NotFound(String),
    #[error(transparent)]
    Tree(#[from] MerkleError),
}
