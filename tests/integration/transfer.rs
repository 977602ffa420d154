use crate::*;
use btide_core::wire::{MsgCode, Packet, DATA_MAX};
use btide_services::{PackageList, PackageStatus};

const IDENT: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4";

/// Chunks larger than one RES packet, with a short tail.
fn large_chunks() -> Vec<Vec<u8>> {
    let mut chunks = distinct_chunks(2, 7000);
    chunks.push(distinct_chunks(3, 3000).remove(2));
    chunks
}

/// Seeder with the full file, leecher with only the manifest.
fn peers() -> (Fixture, Fixture, PackageList, PackageList) {
    let seed = Fixture::new(IDENT, large_chunks()).unwrap();
    seed.write_target(&[]).unwrap();
    let leech = Fixture::new(IDENT, large_chunks()).unwrap();

    let mut seeds = PackageList::new();
    seeds.load_package(&seed.dir, Fixture::MANIFEST).unwrap();
    let mut leeches = PackageList::new();
    leeches.load_package(&leech.dir, Fixture::MANIFEST).unwrap();
    (seed, leech, seeds, leeches)
}

/// Move chunk `index` from seeder to leecher through encoded packets.
fn fetch(seeds: &PackageList, leeches: &mut PackageList, index: usize) -> usize {
    let leech = leeches.find_mut(IDENT).unwrap();

    let req = leech.request(index, 0).unwrap();
    let wire = Packet::with_payload(MsgCode::Req, &req);
    let got = Packet::decode(wire.encode()).unwrap().req().unwrap();
    let ident = got.identifier().unwrap().to_string();

    let seed = seeds.find(&ident).unwrap();
    let responses = seed.serve(&got).unwrap();
    let mut done = false;
    for res in &responses {
        let wire = Packet::with_payload(MsgCode::Res, res);
        let res = Packet::decode(wire.encode()).unwrap().res().unwrap();
        let (stored, complete) = leech.store_response(&res).unwrap();
        assert_eq!(stored, index);
        done = complete;
    }
    assert!(done, "chunk {index} should be fully received");
    leech.commit_chunk(index).unwrap();
    responses.len()
}

#[test]
fn test_transfer_over_packets() {
    let (_seed, leech_fx, seeds, mut leeches) = peers();
    assert_eq!(seeds.find(IDENT).unwrap().status(), PackageStatus::Completed);
    assert_eq!(leeches.find(IDENT).unwrap().status(), PackageStatus::Incomplete);

    assert_eq!(fetch(&seeds, &mut leeches, 0), 7000usize.div_ceil(DATA_MAX));
    assert_eq!(fetch(&seeds, &mut leeches, 2), 2);
    assert_eq!(fetch(&seeds, &mut leeches, 1), 3);

    let leech = leeches.find(IDENT).unwrap();
    assert_eq!(leech.status(), PackageStatus::Completed);
    assert_eq!(
        std::fs::read(leech_fx.target_path()).unwrap(),
        leech_fx.chunks.concat()
    );
}

#[test]
fn test_partial_transfer_moves_frontier() {
    let (_seed, leech_fx, seeds, mut leeches) = peers();
    fetch(&seeds, &mut leeches, 0);

    // Three leaves in heap layout: root 0 -> (1, 2), node 1 -> (3, 4).
    // Chunk 0 sits at node 2, directly under the root.
    let leech = leeches.find(IDENT).unwrap();
    assert_eq!(leech.completed_count(), 1);
    assert_eq!(
        leech.min_completed_hashes().unwrap().into_vec(),
        vec![leech_fx.tree.leaf(0).unwrap().to_string()]
    );

    fetch(&seeds, &mut leeches, 2);
    let leech = leeches.find(IDENT).unwrap();
    assert_eq!(
        leech.min_completed_hashes().unwrap().into_vec(),
        vec![
            leech_fx.tree.leaf(0).unwrap().to_string(),
            leech_fx.tree.leaf(2).unwrap().to_string(),
        ]
    );

    fetch(&seeds, &mut leeches, 1);
    let leech = leeches.find(IDENT).unwrap();
    assert_eq!(
        leech.min_completed_hashes().unwrap().into_vec(),
        vec![leech_fx.tree.root().to_string()]
    );
}

#[test]
fn test_reload_sees_committed_chunks() {
    let (_seed, leech_fx, seeds, mut leeches) = peers();
    fetch(&seeds, &mut leeches, 1);

    let mut reloaded = PackageList::new();
    let pkg = reloaded
        .load_package(&leech_fx.dir, Fixture::MANIFEST)
        .unwrap();
    assert!(pkg.is_chunk_complete(1));
    assert!(!pkg.is_chunk_complete(0));
    assert_eq!(pkg.status(), PackageStatus::Incomplete);
}

#[test]
fn test_remove_requires_long_prefix() {
    let (_seed, _leech, mut seeds, _) = peers();
    assert!(seeds.remove(&IDENT[..8]).is_err());
    assert!(seeds.remove(&IDENT[..24]).is_ok());
    assert!(seeds.is_empty());
}

/// Identical chunks at different offsets each land in their own slot.
#[test]
fn test_transfer_with_repeated_chunks() {
    let chunks = vec![
        b"aaaa".repeat(1000),
        b"zzzz".repeat(1000),
        b"cccc".repeat(1000),
        b"zzzz".repeat(1000),
    ];
    let seed = Fixture::new(IDENT, chunks.clone()).unwrap();
    seed.write_target(&[]).unwrap();
    let leech_fx = Fixture::new(IDENT, chunks).unwrap();

    let mut seeds = PackageList::new();
    seeds.load_package(&seed.dir, Fixture::MANIFEST).unwrap();
    let mut leeches = PackageList::new();
    leeches.load_package(&leech_fx.dir, Fixture::MANIFEST).unwrap();

    assert_eq!(fetch(&seeds, &mut leeches, 3), 2);
    let leech = leeches.find(IDENT).unwrap();
    assert!(leech.is_chunk_complete(3));
    assert!(!leech.is_chunk_complete(1));

    for index in [1, 2, 0] {
        fetch(&seeds, &mut leeches, index);
    }
    let leech = leeches.find(IDENT).unwrap();
    assert_eq!(leech.status(), PackageStatus::Completed);
    assert_eq!(
        std::fs::read(leech_fx.target_path()).unwrap(),
        leech_fx.chunks.concat()
    );
    assert_eq!(
        leech.min_completed_hashes().unwrap().into_vec(),
        vec![leech_fx.tree.root().to_string()]
    );
}
