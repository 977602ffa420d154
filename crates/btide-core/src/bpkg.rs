//! bpkg manifest: the package descriptor format.
//!
//! A manifest is line-oriented text:
//!
//! ```text
//! ident: <string>
//! filename: <string>
//! size: <u32>
//! nhashes: <u32>
//! hashes:
//!   <hex64>                 (nhashes lines)
//! nchunks: <u32>
//! chunks:
//!   <hex64>,<u32>,<u32>     (nchunks lines: hash,offset,size)
//! ```
//!
//! Loading is all-or-nothing: any malformed line aborts with a [`BpkgError`]
//! and no partial descriptor escapes. The loader never touches the target
//! file and never reads chunk payloads.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::crypto::is_digest_hex;

/// Maximum identifier length in bytes.
pub const MAX_IDENT_LEN: usize = 1024;

/// Maximum filename length in bytes.
pub const MAX_FILENAME_LEN: usize = 256;

/// One leaf of the package: a contiguous byte range of the target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Recorded SHA-256 of the chunk bytes (lowercase hex).
    pub hash: String,
    pub offset: u32,
    pub size: u32,
    /// Chunk payload, filled in by the transfer layer. `None` until downloaded.
    pub data: Option<Bytes>,
}

impl Chunk {
    /// `<hash>, <offset>, <size>`, the completed-chunks line format.
    pub fn record(&self) -> String {
        format!("{}, {}, {}", self.hash, self.offset, self.size)
    }
}

/// In-memory form of a bpkg manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub identifier: String,
    pub filename: String,
    pub size: u32,
    /// Recorded internal node hashes, index order, root first.
    pub internal_hashes: Vec<String>,
    /// Leaves in file-offset order.
    pub chunks: Vec<Chunk>,
    /// Where the manifest was loaded from. The target file lives beside it.
    pub path: PathBuf,
}

impl PackageDescriptor {
    /// Read and parse a manifest from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BpkgError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BpkgError::ReadFailed(path.to_path_buf(), e))?;
        let descriptor = Self::parse(&text, path)?;
        tracing::debug!(
            path = %path.display(),
            ident = %descriptor.identifier,
            chunks = descriptor.chunks.len(),
            "bpkg loaded"
        );
        Ok(descriptor)
    }

    /// Parse manifest text. `path` is recorded for target-file resolution only.
    pub fn parse(text: &str, path: impl Into<PathBuf>) -> Result<Self, BpkgError> {
        let mut lines = Lines::new(text);

        let identifier = lines.field("ident")?;
        check_len(&lines, "ident", &identifier, MAX_IDENT_LEN)?;
        let filename = lines.field("filename")?;
        check_len(&lines, "filename", &filename, MAX_FILENAME_LEN)?;
        let size = lines.number("size")?;

        let nhashes = lines.number("nhashes")?;
        lines.label("hashes")?;
        let mut internal_hashes = Vec::new();
        for _ in 0..nhashes {
            let line = lines.next_line("hash")?;
            internal_hashes.push(lines.hash(line)?);
        }

        let nchunks = lines.number("nchunks")?;
        lines.label("chunks")?;
        let mut chunks = Vec::new();
        for _ in 0..nchunks {
            let line = lines.next_line("chunk")?;
            chunks.push(lines.chunk(line)?);
        }

        if let Some((n, _)) = lines.next_non_blank() {
            return Err(BpkgError::Parse {
                line: n,
                reason: format!("unexpected content after {nchunks} chunk records"),
            });
        }

        if chunks.is_empty() {
            return Err(BpkgError::NoChunks);
        }
        if internal_hashes.len() != chunks.len() - 1 {
            return Err(BpkgError::HashCountMismatch {
                nhashes: internal_hashes.len(),
                nchunks: chunks.len(),
            });
        }

        let total: u64 = chunks.iter().map(|c| u64::from(c.size)).sum();
        if total != u64::from(size) {
            tracing::warn!(ident = %identifier, size, total, "chunk sizes do not sum to package size");
        }

        Ok(Self {
            identifier,
            filename,
            size,
            internal_hashes,
            chunks,
            path: path.into(),
        })
    }

    /// The target file, resolved relative to the manifest's directory.
    pub fn target_path(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) => dir.join(&self.filename),
            None => PathBuf::from(&self.filename),
        }
    }

    /// The recorded root hash.
    ///
    /// With a single chunk there are no internal nodes and the leaf is the root.
    pub fn recorded_root(&self) -> &str {
        self.internal_hashes
            .first()
            .or_else(|| self.chunks.first().map(|c| &c.hash))
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Chunk sizes in file order.
    pub fn chunk_sizes(&self) -> Vec<u32> {
        self.chunks.iter().map(|c| c.size).collect()
    }
}

impl fmt::Display for PackageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ident: {}", self.identifier)?;
        writeln!(f, "filename: {}", self.filename)?;
        writeln!(f, "size: {}", self.size)?;
        writeln!(f, "nhashes: {}", self.internal_hashes.len())?;
        writeln!(f, "hashes:")?;
        for h in &self.internal_hashes {
            writeln!(f, "  {h}")?;
        }
        writeln!(f, "nchunks: {}", self.chunks.len())?;
        writeln!(f, "chunks:")?;
        for c in &self.chunks {
            writeln!(f, "  {},{},{}", c.hash, c.offset, c.size)?;
        }
        Ok(())
    }
}

// ── Line reader ───────────────────────────────────────────────────────────────

struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
    current: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.lines().enumerate(),
            current: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> BpkgError {
        BpkgError::Parse {
            line: self.current,
            reason: reason.into(),
        }
    }

    fn next_line(&mut self, what: &str) -> Result<&'a str, BpkgError> {
        match self.inner.next() {
            Some((i, line)) => {
                self.current = i + 1;
                Ok(line.trim())
            }
            None => Err(BpkgError::Truncated(what.to_string())),
        }
    }

    fn next_non_blank(&mut self) -> Option<(usize, &'a str)> {
        self.inner
            .by_ref()
            .map(|(i, l)| (i + 1, l.trim()))
            .find(|(_, l)| !l.is_empty())
    }

    /// Trimmed value of a `<key>: <value>` line.
    fn field(&mut self, key: &str) -> Result<String, BpkgError> {
        let line = self.next_line(key)?;
        let value = line
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| self.error(format!("expected `{key}:`")))?
            .trim();
        if value.is_empty() {
            return Err(self.error(format!("`{key}` has no value")));
        }
        Ok(value.to_string())
    }

    fn number(&mut self, key: &str) -> Result<u32, BpkgError> {
        let value = self.field(key)?;
        value
            .parse()
            .map_err(|_| self.error(format!("`{key}` is not a u32: {value}")))
    }

    fn label(&mut self, key: &str) -> Result<(), BpkgError> {
        let line = self.next_line(key)?;
        match line.strip_prefix(key) {
            Some(":") => Ok(()),
            _ => Err(self.error(format!("expected `{key}:`"))),
        }
    }

    fn hash(&self, s: &str) -> Result<String, BpkgError> {
        if is_digest_hex(s) {
            Ok(s.to_ascii_lowercase())
        } else {
            Err(self.error(format!("expected 64 hex characters, got {} characters", s.len())))
        }
    }

    fn chunk(&self, line: &str) -> Result<Chunk, BpkgError> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [hash, offset, size] = fields.as_slice() else {
            return Err(self.error(format!(
                "chunk record needs 3 comma-separated fields, got {}",
                fields.len()
            )));
        };
        let offset = offset
            .parse()
            .map_err(|_| self.error(format!("chunk offset is not a u32: {offset}")))?;
        let size = size
            .parse()
            .map_err(|_| self.error(format!("chunk size is not a u32: {size}")))?;
        Ok(Chunk {
            hash: self.hash(hash)?,
            offset,
            size,
            data: None,
        })
    }
}

fn check_len(lines: &Lines<'_>, key: &str, value: &str, max: usize) -> Result<(), BpkgError> {
    if value.len() > max {
        return Err(lines.error(format!("`{key}` is {} bytes, max {max}", value.len())));
    }
    Ok(())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BpkgError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("manifest ended early, expected {0} line")]
    Truncated(String),
    #[error("package has no chunks")]
    NoChunks,
    #[error("{nhashes} internal hashes for {nchunks} chunks (expected nchunks - 1)")]
    HashCountMismatch { nhashes: usize, nchunks: usize },
}
