//! Binary entry point for foldscene.
//!
//! Runs structural-alignment searches from the command line and renders
//! their stories without a graphical engine attached.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use foldscene::observability::{self, InitOptions, ObservabilityHandle};
use foldscene::search::PatternIdentifierResolver;
use foldscene::sync::SearchOutcome;
use foldscene::viewer::InMemoryEngine;
use foldscene::{
    FoldsceneConfig, SearchClient, SearchQuery, SearchResult, SearchType, Story, StoryBuilder,
    SyncEngine,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Foldscene - structural alignment search with synchronized 3D stories.
#[derive(Parser)]
#[command(name = "foldscene")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Search for structures aligned to a PDB id or UniProt accession.
    Search {
        /// PDB id or UniProt accession.
        id: String,

        /// Maximum number of results.
        #[arg(short, long)]
        limit: Option<u32>,

        /// Search type: structure or sequence.
        #[arg(short = 't', long = "type", default_value = "structure")]
        search_type: String,

        /// Do not request superposition transforms.
        #[arg(long)]
        no_superposition: bool,

        /// PDB to UniProt mapping for sequence searches (`1tup=P04637`).
        #[arg(long = "map", value_name = "PDB=ACCESSION")]
        mappings: Vec<String>,

        /// Print the resulting story as JSON.
        #[arg(long)]
        json: bool,

        /// Print collected metrics in Prometheus text format afterwards.
        #[arg(long)]
        metrics: bool,
    },

    /// Build a story from a JSON file of search results.
    Story {
        /// JSON file holding an array of results.
        #[arg(short, long)]
        results: PathBuf,

        /// Query identifier the results belong to.
        #[arg(short, long)]
        query: String,

        /// Print the story as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration.
    Config {
        /// Show current configuration.
        #[arg(long)]
        show: bool,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if matches!(cli.command, Commands::Search { metrics: true, .. }) {
        config.observability.metrics_enabled = true;
    }

    let obs_handle = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: false,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, config, &obs_handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(
    cli: Cli,
    config: FoldsceneConfig,
    obs_handle: &ObservabilityHandle,
) -> Result<()> {
    match cli.command {
        Commands::Search {
            id,
            limit,
            search_type,
            no_superposition,
            mappings,
            json,
            metrics,
        } => {
            let query = SearchQuery::new(id)
                .with_limit(limit.unwrap_or(config.search.limit))
                .with_superposition(config.search.superposition && !no_superposition);
            cmd_search(
                &config,
                query,
                SearchType::parse(&search_type),
                &mappings,
                json,
            )
            .await?;
            if metrics {
                match obs_handle.render_metrics() {
                    Some(rendered) => print!("{rendered}"),
                    None => eprintln!("Metrics are disabled"),
                }
            }
            Ok(())
        },

        Commands::Story {
            results,
            query,
            json,
        } => cmd_story(&config, &results, &query, json),

        Commands::Config { show } => cmd_config(&config, show),
    }
}

/// Loads configuration.
fn load_config(path: Option<&str>) -> Result<FoldsceneConfig> {
    // If a path is provided, load from that file
    if let Some(config_path) = path {
        return FoldsceneConfig::load_from_file(Path::new(config_path))
            .with_context(|| format!("loading {config_path}"));
    }

    // Environment override for config path
    if let Ok(config_path) = std::env::var("FOLDSCENE_CONFIG_PATH") {
        if !config_path.trim().is_empty() {
            return FoldsceneConfig::load_from_file(Path::new(&config_path))
                .with_context(|| format!("loading {config_path}"));
        }
    }

    // Otherwise, load from default location
    Ok(FoldsceneConfig::load_default())
}

/// Parses `pdb=accession` pairs into a resolver.
fn parse_mappings(mappings: &[String]) -> Result<PatternIdentifierResolver> {
    let mut resolver = PatternIdentifierResolver::new();
    for mapping in mappings {
        let (pdb_id, accessions) = mapping
            .split_once('=')
            .with_context(|| format!("invalid mapping '{mapping}', expected PDB=ACCESSION"))?;
        resolver = resolver.with_mapping(
            pdb_id,
            accessions
                .split(',')
                .map(str::trim)
                .filter(|accession| !accession.is_empty()),
        );
    }
    Ok(resolver)
}

/// Search command.
async fn cmd_search(
    config: &FoldsceneConfig,
    query: SearchQuery,
    search_type: SearchType,
    mappings: &[String],
    json: bool,
) -> Result<()> {
    let resolver = parse_mappings(mappings)?;
    let engine = SyncEngine::new(
        config.engine_config(),
        Arc::new(SearchClient::from_config(&config.search)),
        Arc::new(InMemoryEngine::new()),
        Arc::new(resolver),
    );

    let _progress = (!json).then(|| {
        engine.subscribe_field(
            |state| state.progress.as_ref().map(|p| p.message.clone()),
            |message| {
                if let Some(message) = message {
                    eprintln!("{message}");
                }
            },
        )
    });

    let outcome = engine.search(query, search_type).await?;
    engine.flush().await;

    let state = engine.state();
    match (outcome, state.story.as_deref()) {
        (SearchOutcome::Completed(_), Some(story)) => {
            if json {
                println!("{}", serde_json::to_string_pretty(story)?);
            } else {
                print_results(&state.results);
                println!();
                print_story(story);
            }
        },
        _ => println!("No results"),
    }
    Ok(())
}

/// Story command.
fn cmd_story(config: &FoldsceneConfig, path: &Path, query: &str, json: bool) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let results: Vec<SearchResult> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing results in {}", path.display()))?;

    let story = StoryBuilder::new(config.story.options()).build(query, &results)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&story)?);
    } else {
        print_story(&story);
    }
    Ok(())
}

/// Config command.
fn cmd_config(config: &FoldsceneConfig, show: bool) -> Result<()> {
    if show {
        println!("Current Configuration");
        println!("=====================");
        println!();
        print!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Use --show to display configuration");
    }
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    println!(
        "{:<4} {:<20} {:>8} {:>9} {:>9}",
        "#", "Structure", "RMSD", "TM-score", "Aligned"
    );
    for (i, result) in results.iter().enumerate() {
        println!(
            "{:<4} {:<20} {:>8.2} {:>9.4} {:>8.1}%",
            i + 1,
            result.object_id,
            result.rmsd,
            result.tm_score,
            result.aligned_percentage * 100.0
        );
    }
}

fn print_story(story: &Story) {
    println!("{}", story.metadata.title);
    for scene in &story.scenes {
        println!("  [{}] {} ({} steps)", scene.key, scene.header, scene.procedure.len());
    }
}
