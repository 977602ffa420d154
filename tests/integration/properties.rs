use std::collections::HashSet;

use crate::*;
use btide_core::query::{self, QueryError};

/// Every corruption pattern over `n` chunks, as index lists.
fn patterns(n: usize) -> impl Iterator<Item = Vec<usize>> {
    (0u32..1 << n).map(move |mask| (0..n).filter(|i| mask & (1 << i) != 0).collect())
}

#[test]
fn test_round_trip_complete_file_for_every_size() {
    for n in 1..=9 {
        let fx = Fixture::new("prop-round-trip", distinct_chunks(n, 24)).unwrap();
        fx.write_target(&[]).unwrap();
        let desc = fx.load().unwrap();

        assert_eq!(desc.internal_hashes.len(), n - 1);
        let truth = MerkleTree::from_file(&desc, &desc.chunk_sizes()).unwrap();
        assert_eq!(truth.len(), 2 * n - 1);
        assert_eq!(truth.root(), desc.recorded_root(), "n = {n}");
        assert_eq!(query::completed_chunks(&desc).unwrap().len(), n);
    }
}

/// Completed chunks are exactly the uncorrupted ones, and always a subset
/// of the recorded chunk hashes.
#[test]
fn test_completed_chunks_match_corruption() {
    for n in 1..=6 {
        let fx = Fixture::new("prop-monotone", distinct_chunks(n, 8)).unwrap();
        let desc = fx.load().unwrap();
        let all: HashSet<String> = fx.chunk_hashes().into_iter().collect();

        for corrupt in patterns(n) {
            fx.write_target(&corrupt).unwrap();
            let indices = query::completed_chunk_indices(&desc).unwrap();
            let expected: Vec<usize> = (0..n).filter(|i| !corrupt.contains(i)).collect();
            assert_eq!(indices, expected, "n = {n}, corrupt = {corrupt:?}");

            for line in query::completed_chunks(&desc).unwrap() {
                let hash = line.split(',').next().unwrap_or_default();
                assert!(all.contains(hash), "{hash} is not a recorded chunk");
            }
        }
    }
}

/// The minimal hash set is an antichain whose subtrees cover exactly the
/// verified chunks.
#[test]
fn test_min_hashes_frontier() {
    for n in 1..=7 {
        let fx = Fixture::new("prop-frontier", distinct_chunks(n, 8)).unwrap();
        let desc = fx.load().unwrap();
        let claimed = MerkleTree::from_chunk_hashes(&desc).unwrap();

        for corrupt in patterns(n) {
            fx.write_target(&corrupt).unwrap();
            let min = query::min_completed_hashes(&desc).unwrap();

            let nodes: Vec<usize> = min
                .iter()
                .map(|h| claimed.position(h).expect("reported hash is in the tree"))
                .collect();
            for &a in &nodes {
                for &b in &nodes {
                    assert!(
                        !is_ancestor(a, b),
                        "n = {n}, corrupt = {corrupt:?}: node {a} is an ancestor of {b}"
                    );
                }
            }

            let mut covered: Vec<&str> = nodes
                .iter()
                .flat_map(|&i| claimed.leaves_under(i))
                .collect();
            covered.sort_unstable();
            let mut expected: Vec<&str> = (0..n)
                .filter(|i| !corrupt.contains(i))
                .filter_map(|i| claimed.leaf(i))
                .collect();
            expected.sort_unstable();
            assert_eq!(covered, expected, "n = {n}, corrupt = {corrupt:?}");
        }
    }
}

/// Two contents laid out A B B A A B B A ..., so sibling subtrees repeat
/// each other's hashes.
fn repeated_chunks(n: usize) -> Vec<Vec<u8>> {
    (0..n)
        .map(|i| if (i ^ (i >> 1)) & 1 == 0 { b"AAAA".to_vec() } else { b"BBBB".to_vec() })
        .collect()
}

/// Recorded hashes of the highest nodes whose chunks all verify, in index order.
fn expected_frontier(tree: &MerkleTree, done: &[usize]) -> Vec<String> {
    let leaf_offset = tree.leaf_offset();
    let verified = |node: usize| {
        (leaf_offset..tree.len())
            .filter(|&leaf| leaf == node || is_ancestor(node, leaf))
            .all(|leaf| done.contains(&(leaf - leaf_offset)))
    };
    (0..tree.len())
        .filter(|&node| verified(node) && (node == 0 || !verified((node - 1) / 2)))
        .filter_map(|node| tree.node(node).map(str::to_string))
        .collect()
}

/// With repeated content, a subtree is only certified by the hash recorded
/// for its own position, never by an identical-looking sibling.
#[test]
fn test_min_hashes_with_repeated_content() {
    for n in 2..=8 {
        let chunks = repeated_chunks(n);
        let fx = Fixture::new("prop-repeated", chunks.clone()).unwrap();
        let desc = fx.load().unwrap();
        let claimed = MerkleTree::from_chunk_hashes(&desc).unwrap();

        for flipped in patterns(n) {
            let data: Vec<u8> = chunks
                .iter()
                .enumerate()
                .flat_map(|(i, c)| {
                    if !flipped.contains(&i) {
                        c.clone()
                    } else if c[0] == b'A' {
                        b"BBBB".to_vec()
                    } else {
                        b"AAAA".to_vec()
                    }
                })
                .collect();
            std::fs::write(fx.target_path(), data).unwrap();

            let done = query::completed_chunk_indices(&desc).unwrap();
            let expected: Vec<usize> = (0..n).filter(|i| !flipped.contains(i)).collect();
            assert_eq!(done, expected, "n = {n}, flipped = {flipped:?}");

            let min = query::min_completed_hashes(&desc).unwrap();
            assert_eq!(
                min.into_vec(),
                expected_frontier(&claimed, &done),
                "n = {n}, flipped = {flipped:?}"
            );
        }
    }
}

#[test]
fn test_reachability() {
    for n in 1..=9 {
        let fx = Fixture::new("prop-reach", distinct_chunks(n, 4)).unwrap();
        let desc = fx.load().unwrap();
        let hashes = fx.chunk_hashes();

        let from_root = query::chunk_hashes_from(&desc, desc.recorded_root()).unwrap();
        assert_eq!(from_root.into_vec(), hashes, "n = {n}");

        for h in &hashes {
            let from_leaf = query::chunk_hashes_from(&desc, h).unwrap();
            assert_eq!(from_leaf.into_vec(), vec![h.clone()]);
        }

        let upper = desc.recorded_root().to_ascii_uppercase();
        assert_eq!(query::chunk_hashes_from(&desc, &upper).unwrap().len(), n);

        assert!(matches!(
            query::chunk_hashes_from(&desc, &digest_hex(b"not in the tree")),
            Err(QueryError::NotFound(_))
        ));
    }
}

#[test]
fn test_all_hashes_order() {
    let fx = Fixture::new("prop-all", distinct_chunks(6, 4)).unwrap();
    let desc = fx.load().unwrap();
    let all = query::all_hashes(&desc).unwrap();
    assert_eq!(all.len(), 11);
    assert_eq!(&all[..5], &desc.internal_hashes[..]);
    assert_eq!(all[5..].to_vec(), fx.chunk_hashes());
}
