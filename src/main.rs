//! FaceVault CLI
//!
//! Builds and queries a store of face descriptors.
//!
//! # Usage
//!
//! ```bash
//! # Store descriptors of one export or a whole folder of exports
//! facevault create exports/ --compress
//!
//! # Find stored faces similar to the ones in a query export
//! facevault retrieve query.json --mode lsh
//!
//! # Post-process a stored dataset
//! facevault dedup data/party.json
//! facevault cluster data/party.json --parallel
//! facevault stats data/party.json
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use facevault::extract::{DescriptorSource, JsonDescriptorSource};
use facevault::format::VEC_EXT;
use facevault::parallel::{cluster_parallel, deduplicate_parallel};
use facevault::persistence::{list_collection_files, strip_collection_extension, with_appended_extension};
use facevault::retrieval::STRUCTURE_DIRS;
use facevault::{
    cluster, deduplicate, read_collection, write_collection, Collection, DedupOrdering, Linear,
    Lsh, LshParams, Retrieval, Settings, VectorStore,
};

#[derive(Parser)]
#[command(name = "facevault")]
#[command(about = "Store and retrieve face descriptors")]
#[command(version)]
struct Cli {
    /// Folder holding the stored datasets (default: per-user data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON settings file overriding thresholds and LSH defaults
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Linear,
    Lsh,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the descriptors of an export file, or of every export below a folder
    Create {
        /// Descriptor export or folder of exports
        input: PathBuf,

        /// Collapse each file's descriptors with clustering first
        #[arg(long)]
        compress: bool,

        /// Replace datasets of files that were already stored
        #[arg(short, long)]
        overwrite: bool,
    },

    /// Query the stored datasets with every descriptor of an export
    Retrieve {
        /// Descriptor export used as query
        input: PathBuf,

        /// Retrieval structure
        #[arg(short, long, value_enum, default_value = "linear")]
        mode: Mode,

        /// Query radius (default: recognition threshold)
        #[arg(short, long)]
        radius: Option<f64>,
    },

    /// Merge exact duplicates of a stored dataset
    Dedup {
        /// Dataset path (either file of the pair, or the prefix)
        dataset: PathBuf,

        /// Output prefix (default: overwrite the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Split the work over LSH buckets on all cores
        #[arg(long)]
        parallel: bool,
    },

    /// Collapse near-identical faces of a stored dataset
    Cluster {
        /// Dataset path (either file of the pair, or the prefix)
        dataset: PathBuf,

        /// Output prefix (default: overwrite the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Edge threshold (default: clustering threshold)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Split the work over LSH buckets on all cores
        #[arg(long)]
        parallel: bool,
    },

    /// Display statistics about a stored dataset
    Stats {
        /// Dataset path (either file of the pair, or the prefix)
        dataset: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data folder {}", data_dir.display()))?;

    match cli.command {
        Commands::Create {
            input,
            compress,
            overwrite,
        } => create(&input, &data_dir, &settings, compress, overwrite)?,

        Commands::Retrieve {
            input,
            mode,
            radius,
        } => retrieve(&input, &data_dir, &settings, mode, radius)?,

        Commands::Dedup {
            dataset,
            output,
            parallel,
        } => {
            let collection = load_dataset(&dataset);
            let result = if parallel {
                deduplicate_parallel(&collection, &settings)?
            } else {
                deduplicate(&collection, DedupOrdering::Value)
            };
            tracing::info!("Deduplicated {} points into {}", collection.len(), result.len());
            save_dataset(&dataset, output.as_deref(), &result)?;
        }

        Commands::Cluster {
            dataset,
            output,
            threshold,
            parallel,
        } => {
            let collection = load_dataset(&dataset);
            let threshold = threshold.unwrap_or(settings.clustering_threshold);
            let result = if parallel {
                let settings = Settings {
                    clustering_threshold: threshold,
                    ..settings.clone()
                };
                cluster_parallel(&collection, &settings)?
            } else {
                cluster(&collection, threshold, settings.cluster_iterations)
            };
            tracing::info!("Clustered {} points into {}", collection.len(), result.len());
            save_dataset(&dataset, output.as_deref(), &result)?;
        }

        Commands::Stats { dataset } => {
            let prefix = strip_collection_extension(&dataset);
            let store = match VectorStore::open(with_appended_extension(&prefix, VEC_EXT)) {
                Ok(store) => store,
                Err(e) => fail(&format!("Cannot open dataset {}: {e}", prefix.display())),
            };
            let collection = read_collection(&prefix);
            println!("Dataset: {:?}", prefix);
            println!("  Vectors: {}", store.count);
            println!("  Dimensions: {}", store.dim);
            println!(
                "  Matrix Size: {:.2} MB",
                store.memory_bytes() as f64 / (1024.0 * 1024.0)
            );
            println!("  Metadata Entries: {}", collection.all_metadata().len());
        }
    }

    Ok(())
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("org", "facevault", "facevault")
        .map(|dirs| dirs.data_dir().join("data_points"))
        .unwrap_or_else(|| PathBuf::from("data_points"))
}

/// Log `message` and exit with status 1.
fn fail(message: &str) -> ! {
    tracing::error!("{message}");
    std::process::exit(1);
}

fn load_dataset(path: &Path) -> Collection {
    let prefix = strip_collection_extension(path);
    let collection = read_collection(&prefix);
    if collection.is_empty() {
        fail(&format!("No valid dataset at {}", prefix.display()));
    }
    collection
}

fn save_dataset(input: &Path, output: Option<&Path>, collection: &Collection) -> anyhow::Result<()> {
    let target = output
        .map(strip_collection_extension)
        .unwrap_or_else(|| strip_collection_extension(input));
    if !write_collection(&target, collection) {
        anyhow::bail!("failed to write dataset {}", target.display());
    }
    tracing::info!("Wrote dataset to {:?}", target);
    Ok(())
}

fn create(
    input: &Path,
    data_dir: &Path,
    settings: &Settings,
    compress: bool,
    overwrite: bool,
) -> anyhow::Result<()> {
    let source = JsonDescriptorSource;

    let processed: BTreeSet<String> = if overwrite {
        BTreeSet::new()
    } else {
        list_collection_files(data_dir, &STRUCTURE_DIRS)
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    };
    let is_pending = |path: &Path| {
        path.file_name()
            .is_some_and(|n| !processed.contains(&*n.to_string_lossy()))
    };

    let pending: Vec<PathBuf> = if input.is_dir() {
        WalkDir::new(input)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| source.accepts(p) && is_pending(p))
            .collect()
    } else if input.is_file() {
        if is_pending(input) {
            vec![input.to_path_buf()]
        } else {
            Vec::new()
        }
    } else {
        fail(&format!("Input path is invalid: {}", input.display()))
    };

    if pending.is_empty() {
        println!("Everything up-to-date.");
        return Ok(());
    }
    println!("Found new files not yet processed:");
    for file in &pending {
        println!("{}", file.display());
    }
    println!();

    for file in &pending {
        let start = Instant::now();
        let extracted = source.extract(file);
        println!("{}", file.display());
        println!("Running time: {:.3} ms.\n", start.elapsed().as_secs_f64() * 1000.0);

        let collection = match extracted {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => {
                tracing::warn!("Could not extract any data points: {}", file.display());
                continue;
            }
            Err(e) => {
                tracing::warn!("Could not extract data points from {}: {e}", file.display());
                continue;
            }
        };
        let collection = if compress {
            cluster(&collection, settings.clustering_threshold, settings.cluster_iterations)
        } else {
            collection
        };

        let Some(name) = file.file_name() else {
            continue;
        };
        let target = data_dir.join(name);
        if !write_collection(&target, &collection) {
            anyhow::bail!("failed to write dataset {}", target.display());
        }
    }
    Ok(())
}

fn retrieve(
    input: &Path,
    data_dir: &Path,
    settings: &Settings,
    mode: Mode,
    radius: Option<f64>,
) -> anyhow::Result<()> {
    if input.is_dir() {
        fail(&format!(
            "Given query file is actually a directory: {}",
            input.display()
        ));
    }
    if !input.is_file() {
        fail(&format!("Query file does not exist: {}", input.display()));
    }

    let queries = JsonDescriptorSource
        .extract(input)
        .with_context(|| format!("reading queries from {}", input.display()))?;
    let radius = radius.unwrap_or(settings.recognition_threshold);

    let structure: Box<dyn Retrieval> = match mode {
        Mode::Linear => Box::new(Linear::open(data_dir, settings)?),
        Mode::Lsh => Box::new(Lsh::open(data_dir, LshParams::random(), settings)?),
    };
    tracing::info!(
        "Searching {} stored points with radius {}",
        structure.len(),
        radius
    );

    let retrieval_key = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or_default()
        .to_string();

    for query in queries.vectors() {
        let start = Instant::now();
        let result = structure.query(query, radius)?;
        println!("Running time: {:.3} ms.\n", start.elapsed().as_secs_f64() * 1000.0);
        println!("{}", result.metadata_report(&retrieval_key));
    }
    Ok(())
}
