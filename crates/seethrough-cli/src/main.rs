//! SeeThrough CLI
//!
//! Tells whether images are AI-generated or human-created, keeps a local
//! history of results and manages the cached classifier model.

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use seethrough_core::{DetectionResult, ImageSource};
use seethrough_detector::{CropRegion, DevicePreference, InferenceEngine, ProgressSink};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod history;
mod scan;

use config::CliConfig;
use history::{HistoryEntry, ScanHistory};

#[derive(Parser, Debug)]
#[command(name = "seethrough")]
#[command(about = "Detect AI-generated images", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "seethrough.yaml", global = true)]
    config: String,

    /// Download the model from this URL
    #[arg(long, global = true)]
    model_url: Option<String>,

    /// Load the model from a local ONNX file
    #[arg(long, global = true, conflicts_with = "model_url")]
    model_path: Option<PathBuf>,

    /// Execution device: auto, cpu, cuda, coreml or directml
    #[arg(long, global = true, value_parser = config::parse_device)]
    device: Option<DevicePreference>,

    /// Model cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Do not read or write the model cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Scan history file
    #[arg(long, global = true)]
    history_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze images given as paths, http(s) URLs or data URLs
    Analyze {
        #[arg(required = true)]
        sources: Vec<String>,

        /// Only analyze this region of a single image: x,y,width,height
        #[arg(long)]
        crop: Option<CropRegion>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Analyze the larger images in a directory
    Scan {
        dir: PathBuf,

        /// Skip images not larger than this in both dimensions
        #[arg(long)]
        min_size: Option<u32>,

        /// Maximum number of images analyzed
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show model and runtime status
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download and load the model ahead of time
    WarmUp,

    /// Remove the cached model binary
    ClearCache,

    /// Show or clear recent results
    History {
        /// Remove all entries
        #[arg(long)]
        clear: bool,

        /// Number of entries shown
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);

    let metrics_handle = if cli.metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    // Load configuration
    let config = CliConfig::load(&cli.config, &cli)?;
    info!("Model: {}", config.detector.model.location.canonical());

    let outcome = run(&cli, config).await;

    if let Some(handle) = metrics_handle {
        println!("{}", handle.render());
    }
    outcome
}

async fn run(cli: &Cli, config: CliConfig) -> Result<()> {
    let engine = || InferenceEngine::new(config.detector.clone());
    let mut history = config
        .history
        .enabled
        .then(|| ScanHistory::open(&config.history.path, config.history.max_entries));

    match &cli.command {
        Command::Analyze {
            sources,
            crop,
            json,
        } => {
            let sources: Vec<ImageSource> = sources.iter().map(|s| ImageSource::parse(s)).collect();
            match (sources.as_slice(), crop) {
                ([source], _) => {
                    let engine = engine()?;
                    let result = match crop {
                        Some(region) => engine.infer_region(source, *region).await?,
                        None => engine.infer(source).await?,
                    };
                    record(history.as_mut(), source, &result);
                    print_result(source, &result, *json)?;
                    Ok(())
                }
                (_, Some(_)) => anyhow::bail!("--crop applies to a single image"),
                _ => analyze_batch(&engine()?, history.as_mut(), sources, *json).await,
            }
        }

        Command::Scan {
            dir,
            min_size,
            limit,
            json,
        } => {
            let min_size = min_size.unwrap_or(config.scan.min_size);
            let limit = limit.unwrap_or(config.scan.limit);
            let candidates = scan::collect(dir, min_size, limit)?;
            if candidates.is_empty() {
                println!("No images larger than {}px found in {}", min_size, dir.display());
                return Ok(());
            }
            info!("Analyzing {} images from {}", candidates.len(), dir.display());

            let sources = candidates
                .into_iter()
                .map(|c| ImageSource::Path(c.path))
                .collect();
            analyze_batch(&engine()?, history.as_mut(), sources, *json).await
        }

        Command::Info { json } => {
            let engine = engine()?;
            let info = engine.model_info();
            let cached = engine.cached_model_version().await;
            if *json {
                let mut value = serde_json::to_value(&info)?;
                value["cachedVersion"] = serde_json::json!(cached);
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Model:        {} {}", info.name, info.version);
                println!("Runtime:      {}", info.runtime);
                // Sessions live only as long as this process
                println!(
                    "Status:       {}",
                    if info.loaded { "loaded" } else { "not loaded in this process" }
                );
                println!("Cached:       {}", cache_status(&info.version, cached.as_deref()));
                if let Some(backend) = info.acceleration {
                    println!("Acceleration: {}", backend);
                }
                println!("Input size:   {}", info.input_size);
                println!("Classes:      {}", info.classes.join(", "));
            }
            Ok(())
        }

        Command::WarmUp => {
            let engine = engine()?;
            let sink: ProgressSink = Arc::new(|percent: f32| {
                eprint!("\rLoading model... {:>3.0}%", percent);
                let _ = std::io::stderr().flush();
            });
            let outcome = engine.warm_up(Some(sink)).await;
            eprintln!();
            outcome?;

            let info = engine.model_info();
            println!(
                "Model {} ready on {}",
                info.version,
                info.acceleration
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "cpu".to_string())
            );
            Ok(())
        }

        Command::ClearCache => {
            engine()?.clear_cache().await?;
            println!("Model cache cleared");
            Ok(())
        }

        Command::History { clear, limit, json } => {
            let mut history = ScanHistory::open(&config.history.path, config.history.max_entries);
            show_history(&mut history, *clear, *limit, *json)
        }
    }
}

async fn analyze_batch(
    engine: &InferenceEngine,
    mut history: Option<&mut ScanHistory>,
    sources: Vec<ImageSource>,
    json: bool,
) -> Result<()> {
    let total = sources.len();
    let job = engine.batch_infer(sources, None);
    let mut items = std::pin::pin!(job.stream());
    let mut reports = Vec::with_capacity(total);
    let mut failures = 0;

    while let Some(item) = items.next().await {
        match &item.outcome {
            Ok(result) => {
                record(history.as_deref_mut(), &item.source, result);
                if json {
                    reports.push(serde_json::json!({
                        "source": item.source.describe(),
                        "result": result,
                    }));
                } else {
                    print_result(&item.source, result, false)?;
                }
            }
            Err(e) => {
                failures += 1;
                if json {
                    reports.push(serde_json::json!({
                        "source": item.source.describe(),
                        "error": e.to_string(),
                    }));
                } else {
                    eprintln!("{}: {}", item.source.describe(), e);
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if failures > 0 {
        anyhow::bail!("{} of {} images could not be analyzed", failures, total);
    }
    Ok(())
}

fn record(history: Option<&mut ScanHistory>, source: &ImageSource, result: &DetectionResult) {
    if let Some(history) = history {
        if let Err(e) = history.record(HistoryEntry::new(source.describe(), result.clone())) {
            warn!("Failed to record history: {}", e);
        }
    }
}

fn print_result(source: &ImageSource, result: &DetectionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", source.describe());
    println!("  {}", result.headline());
    println!("  {}", result.summary());
    println!(
        "  confidence {}%, real {}%, {} ms, model {}",
        result.verdict.confidence, result.real_score, result.processing_time, result.model_version
    );
    Ok(())
}

fn cache_status(version: &str, cached: Option<&str>) -> String {
    match cached {
        Some(v) if v == version => format!("version {} (current)", v),
        Some(v) => format!("stale (version {})", v),
        None => "not cached".to_string(),
    }
}

fn show_history(history: &mut ScanHistory, clear: bool, limit: usize, json: bool) -> Result<()> {
    if clear {
        history.clear()?;
        println!("History cleared");
        return Ok(());
    }

    let entries = &history.entries()[..limit.min(history.len())];
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No scans recorded");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {:>3}%  {:<16}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.result.ai_score,
            entry.result.verdict.label,
            entry.image_url
        );
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("seethrough=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seethrough=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize metrics recorder and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "seethrough_inferences_total",
        "Total number of inferences by outcome"
    );
    metrics::describe_histogram!(
        "seethrough_inference_latency_ms",
        metrics::Unit::Milliseconds,
        "End-to-end inference latency in milliseconds"
    );
    metrics::describe_counter!(
        "seethrough_model_cache_total",
        "Model cache lookups by result"
    );

    Ok(handle)
}
