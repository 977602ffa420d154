//! bpkg-check: inspect a package descriptor and the file it describes.
//!
//! Query output goes to stdout, one line per hash or chunk record. Logs and
//! errors go to stderr.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use btide_core::merkle::MerkleTree;
use btide_core::query::{self, QueryError, QueryResult};
use btide_core::PackageDescriptor;

// ── Query handlers ────────────────────────────────────────────────────────────

/// Print a query result. A failed query is reported, not fatal: the
/// descriptor loaded and the flag was valid.
fn emit(result: Result<QueryResult, QueryError>) {
    match result {
        Ok(lines) => print!("{lines}"),
        Err(e) => eprintln!("{e}"),
    }
}

fn cmd_file_check(desc: &PackageDescriptor) {
    match query::ensure_target_file_exists(desc) {
        Ok(status) => println!("{status}"),
        Err(e) => eprintln!("{e}"),
    }
}

fn cmd_merkle_test(desc: &PackageDescriptor) {
    match MerkleTree::from_chunk_hashes(desc) {
        Ok(tree) => print!("{tree}"),
        Err(e) => eprintln!("{e}"),
    }
}

fn cmd_merkle_data(desc: &PackageDescriptor) {
    match MerkleTree::from_file(desc, &desc.chunk_sizes()) {
        Ok(tree) => print!("{tree}"),
        Err(e) => eprintln!("{e}"),
    }
}

fn load(path: &str) -> Result<PackageDescriptor> {
    PackageDescriptor::load(Path::new(path))
        .with_context(|| format!("unable to load package descriptor {path}"))
}

fn print_usage() {
    eprintln!("Usage: bpkg-check <file.bpkg> <flag> [hash]");
    eprintln!();
    eprintln!("Flags:");
    eprintln!("  -all_hashes        Every hash recorded in the descriptor");
    eprintln!("  -chunk_check       Chunks whose bytes on disk match their hash");
    eprintln!("  -min_hashes        Smallest hash set covering the verified chunks");
    eprintln!("  -hashes_of <hash>  Chunk hashes under <hash>");
    eprintln!("  -file_check        Create the target file if it is missing");
    eprintln!("  -merkle_test       Dump the tree built from recorded hashes");
    eprintln!("  -merkle_data       Dump the tree built from the file's bytes");
}

// ── Entry point ───────────────────────────────────────────────────────────────

enum Command<'a> {
    AllHashes,
    ChunkCheck,
    MinHashes,
    HashesOf(&'a str),
    FileCheck,
    MerkleTest,
    MerkleData,
}

fn parse_flag<'a>(flag: &[&'a str]) -> Option<Command<'a>> {
    match flag {
        ["-all_hashes"] => Some(Command::AllHashes),
        ["-chunk_check"] => Some(Command::ChunkCheck),
        ["-min_hashes"] => Some(Command::MinHashes),
        ["-hashes_of", hash] => Some(Command::HashesOf(*hash)),
        ["-file_check"] => Some(Command::FileCheck),
        ["-merkle_test"] => Some(Command::MerkleTest),
        ["-merkle_data"] => Some(Command::MerkleData),
        _ => None,
    }
}

/// `Ok(false)` means bad usage.
fn run(args: &[&str]) -> Result<bool> {
    let [path, flag @ ..] = args else {
        return Ok(false);
    };
    // Reject the flag before touching the descriptor.
    let Some(command) = parse_flag(flag) else {
        if !flag.is_empty() {
            eprintln!("Unknown arguments: {}", flag.join(" "));
        }
        return Ok(false);
    };

    let desc = load(path)?;
    tracing::debug!(
        ident = %desc.identifier,
        chunks = desc.chunks.len(),
        "descriptor loaded"
    );

    match command {
        Command::AllHashes => emit(query::all_hashes(&desc)),
        Command::ChunkCheck => emit(query::completed_chunks(&desc)),
        Command::MinHashes => emit(query::min_completed_hashes(&desc)),
        Command::HashesOf(hash) => emit(query::chunk_hashes_from(&desc, hash)),
        Command::FileCheck => cmd_file_check(&desc),
        Command::MerkleTest => cmd_merkle_test(&desc),
        Command::MerkleData => cmd_merkle_data(&desc),
    }
    Ok(true)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            print_usage();
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
