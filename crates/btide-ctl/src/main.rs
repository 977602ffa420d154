//! btide: inspect the packages managed in the configured directory and the
//! peers this node tracks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use btide_core::config::BtideConfig;
use btide_services::{PackageError, PackageList, PeerError, PeerList};

// ── Package loading ───────────────────────────────────────────────────────────

/// Load every `*.bpkg` in `dir`, in file-name order. Manifests that fail to
/// load are logged and skipped.
fn load_packages(dir: &Path) -> Result<PackageList> {
    let mut manifests: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read package directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".bpkg"))
        .collect();
    manifests.sort();

    let mut list = PackageList::new();
    for name in &manifests {
        match list.load_package(dir, name) {
            Ok(_) => {}
            Err(PackageError::Duplicate(ident)) => {
                tracing::warn!(manifest = %name, ident = %ident, "duplicate package, skipping");
            }
            Err(e) => {
                tracing::warn!(manifest = %name, error = %e, "unable to load package");
            }
        }
    }
    Ok(list)
}

/// Configured peers, up to `max_peers`. The rest are logged and skipped.
fn load_peers(config: &BtideConfig) -> PeerList {
    let mut peers = PeerList::new(config.max_peers as usize);
    for addr in &config.peers {
        match peers.add(*addr) {
            Ok(_) => {}
            Err(PeerError::Full(max)) => {
                tracing::warn!(peer = %addr, max_peers = max, "peer limit reached, skipping");
            }
            Err(e) => tracing::warn!(peer = %addr, error = %e, "skipping peer"),
        }
    }
    peers
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

fn cmd_packages(config: &BtideConfig) -> Result<()> {
    let list = load_packages(&config.directory)?;
    if list.is_empty() {
        println!("No packages managed");
        return Ok(());
    }
    for line in list.summary_lines(&config.directory) {
        println!("{line}");
    }
    Ok(())
}

fn cmd_status(config: &BtideConfig, prefix: &str) -> Result<()> {
    let list = load_packages(&config.directory)?;
    let package = list
        .find(prefix)
        .with_context(|| format!("no managed package matches {prefix}"))?;
    println!(
        "{} : {} ({}/{} chunks)",
        package.identifier(),
        package.status(),
        package.completed_count(),
        package.descriptor().chunks.len()
    );
    match package.min_completed_hashes() {
        Ok(hashes) => print!("{hashes}"),
        Err(e) => tracing::warn!(error = %e, "unable to verify target file"),
    }
    Ok(())
}

fn cmd_peers(config: &BtideConfig) {
    let peers = load_peers(config);
    if peers.is_empty() {
        println!("No known peers");
        return;
    }
    println!(
        "Known peers ({}/{}), listening on port {}:",
        peers.len(),
        peers.max_peers(),
        config.port
    );
    println!();
    for line in peers.summary_lines() {
        println!("{line}");
    }
}

fn cmd_config(config: &BtideConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

fn print_usage() {
    println!("Usage: btide [--config <path>] <command>");
    println!();
    println!("Commands:");
    println!("  packages               List managed packages and their status");
    println!("  status <ident-prefix>  Show the verified hashes of one package");
    println!("  peers                  List configured peers, up to max_peers");
    println!("  config                 Print the effective configuration");
    println!();
    println!("Options:");
    println!("  --config <path>   Config file (default: {})", BtideConfig::file_path().display());
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path: Option<PathBuf> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            i += 1;
            config_path = Some(PathBuf::from(
                args.get(i).context("--config requires a value")?,
            ));
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    if matches!(remaining.as_slice(), ["help"] | ["--help"] | ["-h"]) {
        print_usage();
        return Ok(());
    }

    let path = match config_path {
        Some(path) => path,
        None => {
            let path = BtideConfig::file_path();
            if let Err(e) = BtideConfig::write_default_if_missing(&path) {
                tracing::warn!(error = %e, "failed to write default config");
            }
            path
        }
    };
    let config = BtideConfig::load_from(&path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    config.ensure_directory()?;

    match remaining.as_slice() {
        ["packages"] | [] => cmd_packages(&config),
        ["status", prefix] => cmd_status(&config, prefix),
        ["peers"] => {
            cmd_peers(&config);
            Ok(())
        }
        ["config"] => cmd_config(&config),
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
