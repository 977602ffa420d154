//! btide integration test harness.
//!
//! Tests here work against real manifests and target files written to a
//! scratch directory under the system temp dir. Each test owns its
//! directory and removes it when the [`Fixture`] drops.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use btide_core::crypto::digest_hex;
use btide_core::merkle::MerkleTree;
use btide_core::PackageDescriptor;

mod properties;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A scratch directory holding one package manifest and its target file.
pub struct Fixture {
    pub dir: PathBuf,
    pub chunks: Vec<Vec<u8>>,
    pub tree: MerkleTree,
}

impl Fixture {
    /// Write `pkg.bpkg` for `chunks`. The target file is not created.
    pub fn new(ident: &str, chunks: Vec<Vec<u8>>) -> Result<Self> {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "btide-integration-{}-{}",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let leaves: Vec<String> = chunks.iter().map(|c| digest_hex(c)).collect();
        let tree = MerkleTree::from_leaves(leaves)?;
        std::fs::write(dir.join(Self::MANIFEST), manifest(ident, &tree, &chunks))?;
        Ok(Self { dir, chunks, tree })
    }

    pub const MANIFEST: &'static str = "pkg.bpkg";

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(Self::MANIFEST)
    }

    pub fn target_path(&self) -> PathBuf {
        self.dir.join("pkg.bin")
    }

    pub fn load(&self) -> Result<PackageDescriptor> {
        Ok(PackageDescriptor::load(self.manifest_path())?)
    }

    /// Write the target file with every chunk in `corrupt` replaced by
    /// same-length garbage.
    pub fn write_target(&self, corrupt: &[usize]) -> Result<()> {
        let mut data = Vec::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if corrupt.contains(&i) {
                data.extend(chunk.iter().map(|b| b ^ 0xff));
            } else {
                data.extend_from_slice(chunk);
            }
        }
        std::fs::write(self.target_path(), data)?;
        Ok(())
    }

    pub fn chunk_hashes(&self) -> Vec<String> {
        (0..self.tree.n_leaves())
            .filter_map(|i| self.tree.leaf(i).map(str::to_string))
            .collect()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Manifest text for `chunks`, target file `pkg.bin`.
pub fn manifest(ident: &str, tree: &MerkleTree, chunks: &[Vec<u8>]) -> String {
    let size: usize = chunks.iter().map(Vec::len).sum();
    let internal = &tree.nodes()[..tree.leaf_offset()];
    let mut text = format!(
        "ident: {ident}\nfilename: pkg.bin\nsize: {size}\nnhashes: {}\nhashes:\n",
        internal.len()
    );
    for h in internal {
        text.push_str(&format!("  {h}\n"));
    }
    text.push_str(&format!("nchunks: {}\nchunks:\n", chunks.len()));
    let mut offset = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        text.push_str(&format!("  {},{},{}\n", tree.leaf(i).unwrap_or(""), offset, chunk.len()));
        offset += chunk.len();
    }
    text
}

/// `n` distinct chunks of `size` bytes each.
pub fn distinct_chunks(n: usize, size: usize) -> Vec<Vec<u8>> {
    (0..n)
        .map(|i| {
            let seed = format!("{i:04}-chunk|");
            seed.bytes().cycle().take(size).collect()
        })
        .collect()
}

/// True if node `a` is a proper ancestor of node `b` in heap layout.
pub fn is_ancestor(a: usize, mut b: usize) -> bool {
    while b > 0 {
        b = (b - 1) / 2;
        if b == a {
            return true;
        }
    }
    false
}

pub fn exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_fixture_manifest_loads() {
    let fx = Fixture::new("fixture-check", distinct_chunks(5, 16)).unwrap();
    let desc = fx.load().unwrap();
    assert_eq!(desc.chunks.len(), 5);
    assert_eq!(desc.internal_hashes.len(), 4);
    assert_eq!(desc.recorded_root(), fx.tree.root());
    assert_eq!(desc.target_path(), fx.target_path());
}

#[test]
fn test_heap_ancestry_helper() {
    assert!(is_ancestor(0, 6));
    assert!(is_ancestor(1, 3));
    assert!(is_ancestor(1, 4));
    assert!(!is_ancestor(1, 5));
    assert!(!is_ancestor(3, 3));
    assert!(!is_ancestor(4, 1));
}
