//! Package list: the packages this node manages.
//!
//! The list is an ordinary owned collection keyed by identifier. Whoever
//! drives the node owns it and passes it by reference; there is no global
//! registry. Writes to a package (incoming chunk data, commits to the
//! target file) go through `&mut`, so the borrow checker serialises them
//! against the read-only completeness queries.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

use btide_core::bpkg::{BpkgError, PackageDescriptor};
use btide_core::crypto::digest_hex;
use btide_core::merkle::MerkleError;
use btide_core::query::{self, QueryError, QueryResult};
use btide_core::wire::{ReqPayload, ResPayload, WireError, DATA_MAX};

use crate::ranges::Ranges;

/// Identifiers shorter than this are too ambiguous to remove by prefix.
pub const MIN_REMOVE_IDENT_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    Completed,
    Incomplete,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageStatus::Completed => f.write_str("COMPLETED"),
            PackageStatus::Incomplete => f.write_str("INCOMPLETE"),
        }
    }
}

/// A managed package: its descriptor plus per-chunk download state.
#[derive(Debug)]
pub struct Package {
    descriptor: PackageDescriptor,
    completed: Vec<bool>,
    pending: Vec<Option<(BytesMut, Ranges)>>,
}

impl Package {
    /// Wrap a descriptor, checking which chunks are already on disk.
    ///
    /// A missing target file means nothing is complete yet.
    pub fn new(descriptor: PackageDescriptor) -> Result<Self, PackageError> {
        let n = descriptor.chunks.len();
        let mut completed = vec![false; n];
        match query::completed_chunk_indices(&descriptor) {
            Ok(done) => {
                for i in done {
                    completed[i] = true;
                }
            }
            Err(QueryError::Tree(MerkleError::Open(path, e))) => {
                tracing::debug!(path = %path.display(), error = %e, "target file not present yet");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            descriptor,
            completed,
            pending: vec![None; n],
        })
    }

    pub fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    pub fn identifier(&self) -> &str {
        &self.descriptor.identifier
    }

    pub fn completed_count(&self) -> usize {
        self.completed.iter().filter(|&&c| c).count()
    }

    pub fn is_chunk_complete(&self, index: usize) -> bool {
        self.completed.get(index).copied().unwrap_or(false)
    }

    pub fn status(&self) -> PackageStatus {
        if self.completed_count() == self.completed.len() {
            PackageStatus::Completed
        } else {
            PackageStatus::Incomplete
        }
    }

    /// Hashes a peer needs to verify what we hold. See
    /// [`query::min_completed_hashes`].
    pub fn min_completed_hashes(&self) -> Result<QueryResult, PackageError> {
        Ok(query::min_completed_hashes(&self.descriptor)?)
    }

    /// Chunk with `hash` whose byte range contains `file_offset`.
    ///
    /// Identical chunks share a hash, so the offset picks between them.
    fn locate(&self, hash: &str, file_offset: u32) -> Result<usize, PackageError> {
        let mut known = false;
        for (i, c) in self.descriptor.chunks.iter().enumerate() {
            if c.hash != hash {
                continue;
            }
            known = true;
            let end = u64::from(c.offset) + u64::from(c.size);
            if file_offset >= c.offset && u64::from(file_offset) < end {
                return Ok(i);
            }
        }
        if known {
            Err(PackageError::OffsetOutsideChunk {
                hash: hash.to_string(),
                file_offset,
            })
        } else {
            Err(PackageError::UnknownChunk(hash.to_string()))
        }
    }

    /// Build a request for chunk `index` starting `offset` bytes into it.
    pub fn request(&self, index: usize, offset: u32) -> Result<ReqPayload, PackageError> {
        let chunk = self
            .descriptor
            .chunks
            .get(index)
            .ok_or(PackageError::NoSuchChunk(index))?;
        let invalid = PackageError::InvalidOffset {
            offset,
            size: chunk.size,
        };
        if offset >= chunk.size {
            return Err(invalid);
        }
        let file_offset = chunk.offset.checked_add(offset).ok_or(invalid)?;
        Ok(ReqPayload::new(
            self.identifier(),
            &chunk.hash,
            file_offset,
            chunk.size - offset,
        ))
    }

    /// Answer a request from the target file, split into RES payloads.
    ///
    /// Only chunks verified complete are served.
    pub fn serve(&self, req: &ReqPayload) -> Result<Vec<ResPayload>, PackageError> {
        let hash = req.chunk_hash()?;
        let start = req.file_offset.get();
        let index = self.locate(hash, start)?;
        if !self.completed[index] {
            return Err(PackageError::ChunkNotComplete(hash.to_string()));
        }
        let chunk = &self.descriptor.chunks[index];
        let end = u64::from(start) + u64::from(req.data_len.get());
        let chunk_end = u64::from(chunk.offset) + u64::from(chunk.size);
        if end > chunk_end {
            return Err(PackageError::Overflow {
                end: end - u64::from(chunk.offset),
                size: chunk.size,
            });
        }

        let path = self.descriptor.target_path();
        let mut file = File::open(&path).map_err(|e| PackageError::Io(path.clone(), e))?;
        let mut data = vec![0u8; req.data_len.get() as usize];
        file.seek(SeekFrom::Start(u64::from(start)))
            .and_then(|_| file.read_exact(&mut data))
            .map_err(|e| PackageError::Io(path.clone(), e))?;

        let mut out = Vec::with_capacity(data.len().div_ceil(DATA_MAX));
        for (i, piece) in data.chunks(DATA_MAX).enumerate() {
            let offset = start + (i * DATA_MAX) as u32;
            out.push(ResPayload::new(self.identifier(), hash, offset, piece)?);
        }
        Ok(out)
    }

    /// Stage a response's bytes into its chunk buffer.
    ///
    /// Returns the chunk index and whether every byte of it has arrived.
    pub fn store_response(&mut self, res: &ResPayload) -> Result<(usize, bool), PackageError> {
        let hash = res.chunk_hash()?;
        let file_offset = res.file_offset.get();
        let index = self.locate(hash, file_offset)?;
        let chunk = &self.descriptor.chunks[index];
        let data = res.data();

        let start = file_offset - chunk.offset;
        let end = u64::from(start) + data.len() as u64;
        if end > u64::from(chunk.size) {
            return Err(PackageError::Overflow {
                end,
                size: chunk.size,
            });
        }

        let size = chunk.size as usize;
        let (buf, ranges) = self.pending[index]
            .get_or_insert_with(|| (BytesMut::zeroed(size), Ranges::default()));
        buf[start as usize..end as usize].copy_from_slice(data);
        ranges.insert(start, end as u32);
        Ok((index, ranges.covered() == u64::from(chunk.size)))
    }

    /// Verify a fully staged chunk and write it into the target file.
    ///
    /// A digest mismatch discards the staged bytes. A write failure keeps
    /// them staged so the commit can be retried.
    pub fn commit_chunk(&mut self, index: usize) -> Result<(), PackageError> {
        let chunk = self
            .descriptor
            .chunks
            .get(index)
            .ok_or(PackageError::NoSuchChunk(index))?;
        let Some((buf, ranges)) = self.pending[index].take() else {
            return Err(PackageError::ChunkNotStaged(index));
        };
        if ranges.covered() != u64::from(chunk.size) {
            let covered = ranges.covered();
            self.pending[index] = Some((buf, ranges));
            return Err(PackageError::ChunkIncomplete {
                index,
                covered,
                size: chunk.size,
            });
        }

        let actual = digest_hex(&buf);
        if actual != chunk.hash {
            tracing::warn!(
                ident = %self.descriptor.identifier,
                chunk = index,
                expected = %chunk.hash,
                actual = %actual,
                "chunk failed verification, discarding"
            );
            return Err(PackageError::IntegrityMismatch(index));
        }

        let path = self.descriptor.target_path();
        if let Err(e) = write_at(&path, chunk.offset, &buf) {
            tracing::warn!(path = %path.display(), chunk = index, error = %e, "chunk write failed");
            self.pending[index] = Some((buf, ranges));
            return Err(PackageError::Io(path, e));
        }

        tracing::debug!(ident = %self.descriptor.identifier, chunk = index, "chunk committed");
        self.descriptor.chunks[index].data = Some(buf.freeze());
        self.completed[index] = true;
        Ok(())
    }

    /// Committed payload of a chunk, if this session received it.
    pub fn chunk_data(&self, index: usize) -> Option<&Bytes> {
        self.descriptor.chunks.get(index)?.data.as_ref()
    }
}

fn write_at(path: &Path, offset: u32, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.seek(SeekFrom::Start(u64::from(offset)))?;
    file.write_all(data)
}

/// Insertion-ordered collection of managed packages.
#[derive(Debug, Default)]
pub struct PackageList {
    packages: Vec<Package>,
}

impl PackageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `manifest` from `directory` and start managing it.
    pub fn load_package(
        &mut self,
        directory: &Path,
        manifest: &str,
    ) -> Result<&Package, PackageError> {
        if manifest.is_empty() {
            return Err(PackageError::MissingArgument);
        }
        let descriptor = PackageDescriptor::load(directory.join(manifest))?;
        self.add(Package::new(descriptor)?)
    }

    pub fn add(&mut self, package: Package) -> Result<&Package, PackageError> {
        if self
            .packages
            .iter()
            .any(|p| p.identifier() == package.identifier())
        {
            return Err(PackageError::Duplicate(package.identifier().to_string()));
        }
        tracing::info!(
            ident = %package.identifier(),
            status = %package.status(),
            "package added"
        );
        self.packages.push(package);
        Ok(&self.packages[self.packages.len() - 1])
    }

    /// First package whose identifier starts with `prefix`.
    pub fn find(&self, prefix: &str) -> Option<&Package> {
        self.packages
            .iter()
            .find(|p| p.identifier().starts_with(prefix))
    }

    pub fn find_mut(&mut self, prefix: &str) -> Option<&mut Package> {
        self.packages
            .iter_mut()
            .find(|p| p.identifier().starts_with(prefix))
    }

    /// Stop managing a package, matched by identifier prefix.
    pub fn remove(&mut self, prefix: &str) -> Result<Package, PackageError> {
        if prefix.len() < MIN_REMOVE_IDENT_LEN {
            return Err(PackageError::IdentifierTooShort(prefix.to_string()));
        }
        let pos = self
            .packages
            .iter()
            .position(|p| p.identifier().starts_with(prefix))
            .ok_or_else(|| PackageError::NotManaged(prefix.to_string()))?;
        Ok(self.packages.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// `<n>. <ident prefix>, <dir>/<filename> : <status>` per package.
    pub fn summary_lines(&self, directory: &Path) -> Vec<String> {
        self.packages
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let ident: String = p.identifier().chars().take(32).collect();
                format!(
                    "{}. {}, {}/{} : {}",
                    i + 1,
                    ident,
                    directory.display(),
                    p.descriptor.filename,
                    p.status()
                )
            })
            .collect()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("missing file argument")]
    MissingArgument,
    #[error(transparent)]
    Load(#[from] BpkgError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("package {0} is already managed")]
    Duplicate(String),
    #[error("identifier {0:?} is too short to remove")]
    IdentifierTooShort(String),
    #[error("identifier {0:?} does not match a managed package")]
    NotManaged(String),
    #[error("chunk hash {0} does not belong to package")]
    UnknownChunk(String),
    #[error("no chunk with hash {hash} covers file offset {file_offset}")]
    OffsetOutsideChunk { hash: String, file_offset: u32 },
    #[error("no chunk at index {0}")]
    NoSuchChunk(usize),
    #[error("offset {offset} is outside chunk of size {size}")]
    InvalidOffset { offset: u32, size: u32 },
    #[error("data ends at {end}, past chunk size {size}")]
    Overflow { end: u64, size: u32 },
    #[error("chunk {0} has no staged data")]
    ChunkNotStaged(usize),
    #[error("chunk {index} has {covered} of {size} bytes")]
    ChunkIncomplete { index: usize, covered: u64, size: u32 },
    #[error("chunk {0} does not match its recorded hash")]
    IntegrityMismatch(usize),
    #[error("chunk {0} is not complete locally")]
    ChunkNotComplete(String),
    #[error("{0}: {1}")]
    Io(PathBuf, std::io::Error),
}
