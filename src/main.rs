//! DVR CLI

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dvr::matching::{normalize_url, request_debug_key};
use dvr::{Cassette, SessionConfig};

/// Inspect cassettes and session configuration
#[derive(Debug, Parser)]
#[command(name = "dvr", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show statistics for a cassette file
    Stats {
        /// Path to the cassette
        cassette: PathBuf,
    },
    /// List the interactions in a cassette file
    List {
        /// Path to the cassette
        cassette: PathBuf,
    },
    /// Validate a session configuration file
    Check {
        /// Path to the TOML configuration
        config: PathBuf,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Stats { cassette } => show_stats(&cassette),
        Commands::List { cassette } => list_interactions(&cassette),
        Commands::Check { config } => check_config(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load_cassette(path: &Path) -> Result<Cassette> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read cassette {}", path.display()))?;
    Cassette::from_json(&data).with_context(|| format!("Invalid cassette {}", path.display()))
}

fn show_stats(path: &Path) -> Result<()> {
    let cassette = load_cassette(path)?;

    let mut methods: BTreeMap<&str, usize> = BTreeMap::new();
    let mut statuses: BTreeMap<u16, usize> = BTreeMap::new();
    let mut hosts: BTreeMap<String, usize> = BTreeMap::new();
    let mut body_bytes = 0usize;

    for interaction in cassette.interactions() {
        *methods.entry(interaction.request.method.as_str()).or_default() += 1;
        *statuses.entry(interaction.response.status).or_default() += 1;
        *hosts.entry(host_of(&interaction.request.url)).or_default() += 1;
        body_bytes += interaction.response_data.as_ref().map_or(0, |data| data.len());
    }

    println!("Cassette: {}", cassette.name());
    println!("File: {}", path.display());
    println!("Interactions: {}", cassette.len());
    println!("Response body bytes: {body_bytes}");

    let recorded = cassette.interactions().iter().map(|i| i.recorded_at);
    if let (Some(first), Some(last)) = (recorded.clone().min(), recorded.max()) {
        println!("Recorded between: {first} and {last} (unix seconds)");
    }

    println!();
    println!("Methods:");
    for (method, count) in &methods {
        println!("  {method:<8} {count}");
    }

    println!("Status codes:");
    for (status, count) in &statuses {
        println!("  {status:<8} {count}");
    }

    println!("Hosts:");
    for (host, count) in &hosts {
        println!("  {host:<32} {count}");
    }

    Ok(())
}

fn list_interactions(path: &Path) -> Result<()> {
    let cassette = load_cassette(path)?;

    for (i, interaction) in cassette.interactions().iter().enumerate() {
        let bytes = interaction.response_data.as_ref().map_or(0, |data| data.len());
        println!(
            "{i:>4}  {} {} -> {} ({bytes} bytes)",
            interaction.request.method, interaction.request.url, interaction.response.status
        );
        debug!(key = %request_debug_key(&interaction.request), "Listed interaction");
    }

    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = SessionConfig::from_file(path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;

    println!("Configuration OK");
    println!("  cassette:          {}", config.cassette_name);
    println!("  fixture dir:       {}", config.fixture_dir().display());
    println!("  output dir:        {}", config.output_dir.display());
    println!("  output path:       {}", config.output_path().display());
    println!("  recording enabled: {}", config.recording_enabled);
    if config.headers_to_check.is_empty() {
        println!("  headers to check:  (none)");
    } else {
        println!("  headers to check:  {}", config.headers_to_check.join(", "));
    }

    Ok(())
}

/// Authority of a URL, or the whole URL if it has none
fn host_of(url: &str) -> String {
    let normalized = normalize_url(url);
    normalized
        .parse::<hyper::Uri>()
        .ok()
        .and_then(|uri| uri.authority().map(ToString::to_string))
        .unwrap_or(normalized)
}
