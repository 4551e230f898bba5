//! mpdkit CLI - Million Playlist Dataset extraction and enrichment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mpdkit::checkpoint::CheckpointManager;
use mpdkit::client::{HealthStatus, SpotifyClient};
use mpdkit::extract::{analyze_structure, count_playlists, discover_slices};
use mpdkit::models::Config;
use mpdkit::pipeline::{EnrichPipeline, ExtractPipeline, FEATURES_FILE};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mpdkit")]
#[command(author = "Infernet <dev@infernet.org>")]
#[command(version)]
#[command(about = "Million Playlist Dataset extraction and Spotify audio-feature enrichment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "mpdkit.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Count playlists in a dataset directory and classify it
    Count {
        /// Dataset directory (overrides extract.data_dir)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Extract the unique track catalog from MPD slice files
    Extract {
        /// Dataset directory (overrides extract.data_dir)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Cap on slice files to process
        #[arg(short, long)]
        max_slices: Option<usize>,

        /// Output directory (overrides output.dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch audio features for an extracted catalog
    Enrich {
        /// Path to the extracted catalog JSON
        #[arg(short, long)]
        tracks: PathBuf,

        /// Path to output JSONL file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Checkpoint directory for resumable runs
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Track URIs per request (capped at 100)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Probe Spotify API connectivity and print a diagnosis
    Check,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# mpdkit configuration file

[spotify]
# Credentials (can also use SPOTIFY_CLIENT_ID / SPOTIFY_CLIENT_SECRET env vars)
# client_id = "..."
# client_secret = "..."
api_base_url = "https://api.spotify.com/v1"
auth_url = "https://accounts.spotify.com/api/token"
timeout_secs = 30
max_retries = 3

[extract]
data_dir = "data/raw"
# max_slices = 5  # cap for test runs on a subset

[enrich]
batch_size = 100   # capped at the API's 100-id limit
fetchers = 4
delay_ms = 100
save_every = 10

[output]
dir = "data/interim"
# checkpoint_dir = "checkpoints/"
write_failed = true
"#;
    println!("{example}");
}

fn build_client(config: &Config) -> Result<Arc<SpotifyClient>> {
    let credentials = config
        .resolve_credentials()
        .context("Failed to resolve Spotify credentials")?;

    let client = SpotifyClient::new(
        credentials,
        Some(config.spotify.api_base_url.clone()),
        Some(config.spotify.auth_url.clone()),
        Some(config.spotify.timeout_secs),
        Some(config.spotify.max_retries),
        None,
    )?;

    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            config.validate().context("Invalid configuration")?;

            // Try to resolve credentials
            config
                .resolve_credentials()
                .context("Failed to resolve Spotify credentials")?;

            info!("Configuration is valid");
            info!("  Data dir:   {}", config.extract.data_dir.display());
            info!("  Output dir: {}", config.output.dir.display());
            info!(
                "  Enrichment: {} fetchers, batches of {}",
                config.enrich.fetchers,
                config.enrich.effective_batch_size()
            );
            return Ok(());
        }

        Commands::Count { data_dir } => {
            let mut config = Config::load_or_default(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            if let Some(dir) = data_dir {
                config.extract.data_dir = dir;
            }

            let report = analyze_structure(&config.extract.data_dir)
                .context("Failed to analyze dataset directory")?;

            println!("\n=== Dataset Structure ===");
            println!("Directory:  {}", config.extract.data_dir.display());
            println!("Files:      {}", report.total_files);
            println!("JSON files: {}", report.json_files);
            for (name, size_mb) in &report.samples {
                println!("  {name} ({size_mb:.1} MB)");
            }

            let files = discover_slices(&config.extract.data_dir, None)
                .context("No slice files to count")?;
            let counts = count_playlists(&files);

            println!("\n=== Playlist Count ===");
            println!("Files counted: {}/{}", counts.files_counted(), files.len());
            if counts.files_failed > 0 {
                println!("Files skipped: {}", counts.files_failed);
            }
            println!("Playlists:     {}", counts.total_playlists);
            println!("Dataset:       {}", counts.kind().describe());
        }

        Commands::Extract {
            data_dir,
            max_slices,
            output,
        } => {
            let mut config = Config::load_or_default(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            if let Some(dir) = data_dir {
                config.extract.data_dir = dir;
            }
            if max_slices.is_some() {
                config.extract.max_slices = max_slices;
            }
            if let Some(dir) = output {
                config.output.dir = dir;
            }

            let pipeline = ExtractPipeline::new(config);
            let (output_path, stats) = pipeline.run()?;

            println!("\n=== Extraction Complete ===");
            println!("Slices:      {}/{}", stats.slices_processed, stats.slices_found);
            if stats.slices_failed > 0 {
                println!("Skipped:     {}", stats.slices_failed);
            }
            println!("Instances:   {}", stats.total_instances);
            println!("Unique:      {}", stats.unique_tracks);
            println!("Mean freq:   {:.1}", stats.mean_frequency);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {}", output_path.display());
        }

        Commands::Enrich {
            tracks,
            output,
            checkpoint,
            batch_size,
        } => {
            let mut config = Config::load_or_default(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            // Override batch size from CLI
            if let Some(size) = batch_size {
                config.enrich.batch_size = size;
            }
            config.validate().context("Invalid configuration")?;

            let output_path = output.unwrap_or_else(|| config.output.dir.join(FEATURES_FILE));
            let checkpoint_dir = checkpoint.or_else(|| config.output.checkpoint_dir.clone());

            let client = build_client(&config)?;
            let pipeline = EnrichPipeline::new(config, Arc::clone(&client));

            let uris = EnrichPipeline::load_track_uris(&tracks)
                .with_context(|| format!("Failed to load catalog from {tracks:?}"))?;

            // Setup checkpoint manager if requested
            let checkpoint_mgr = if let Some(dir) = checkpoint_dir {
                let mut mgr = CheckpointManager::new(&dir)
                    .context("Failed to create checkpoint manager")?;
                mgr.init_or_load(&uris)
                    .context("Failed to initialize checkpoint")?;
                Some(mgr)
            } else {
                None
            };

            let stats = pipeline
                .run_with_checkpoint(uris, &output_path, checkpoint_mgr)
                .await?;

            println!("\n=== Enrichment Complete ===");
            println!("Tracks:      {}", stats.total_requested);
            println!("Fetched:     {}", stats.fetched);
            println!("Missing:     {}", stats.missing);
            println!("Failed:      {}", stats.failed);
            println!("Success:     {:.1}%", stats.success_rate * 100.0);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {}", output_path.display());
        }

        Commands::Check => {
            let config = Config::load_or_default(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            let client = build_client(&config)?;
            let results = client.health_check().await;

            println!("\n=== Spotify API Check ===");
            for result in &results {
                let status = match result.status {
                    HealthStatus::Healthy => "ok",
                    HealthStatus::Unhealthy => "FAILED",
                };
                println!(
                    "{:<16} {:<7} {:>5}ms  {}",
                    result.endpoint,
                    status,
                    result.latency.as_millis(),
                    result.message.as_deref().unwrap_or("")
                );
            }

            let healthy = |name: &str| {
                results
                    .iter()
                    .any(|r| r.endpoint == name && r.status == HealthStatus::Healthy)
            };

            println!("\n=== Diagnosis ===");
            if !healthy("token") {
                println!("Token request failed: check client id/secret and app status");
                println!("in the Spotify Developer Dashboard.");
            } else if healthy("search") && healthy("tracks") && !healthy("audio-features") {
                println!("Search and track lookup work but audio features fail:");
                println!("the app needs audio-features access - check 'Users and access'");
                println!("in the Spotify Developer Dashboard.");
            } else if results.iter().all(|r| r.status == HealthStatus::Healthy) {
                println!("All endpoints reachable.");
            } else {
                println!("Some endpoints failed: see messages above.");
            }
        }
    }

    Ok(())
}
