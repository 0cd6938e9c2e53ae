//! partstore control binary
//!
//! Inspects and edits a durable store on local disk, and moves partitions
//! through a shared blob directory.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use partstore::{
    BlobTransferManager, FsBlobStore, PartitionId, PersistenceType, StorageEngine,
    StoragePartitionConfig, StoreConfig, StoreError, StoreRegistry, TransferConfig,
};
use tracing_subscriber::{fmt, EnvFilter};

/// partstore control
#[derive(Parser, Debug)]
#[command(name = "partstore-ctl")]
#[command(about = "Inspect and transfer partstore partitions")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./partstore_data")]
    data_dir: PathBuf,

    /// Store name, including its version (e.g. users_v1)
    #[arg(short, long)]
    store: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List persisted partition ids
    Partitions,

    /// Create an empty partition
    Create {
        partition: PartitionId,

        /// Reject writes for the rest of this invocation
        #[arg(long)]
        read_only: bool,
    },

    /// Drop a partition and delete its data
    Drop { partition: PartitionId },

    /// Write a key-value pair
    Put {
        partition: PartitionId,
        key: String,
        value: String,
    },

    /// Read a value by key
    Get { partition: PartitionId, key: String },

    /// Delete a key
    Delete { partition: PartitionId, key: String },

    /// Print entries in key order
    Scan {
        partition: PartitionId,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Upload a snapshot of a local partition to the blob directory
    Upload {
        partition: PartitionId,

        #[arg(long)]
        blob_dir: PathBuf,
    },

    /// Bootstrap a partition from the blob directory
    Bootstrap {
        partition: PartitionId,

        #[arg(long)]
        blob_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,partstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("partstore-ctl v{}", partstore::VERSION);

    let config = StoreConfig::builder(&args.store)
        .persistence_type(PersistenceType::Durable)
        .data_dir(&args.data_dir)
        .build();

    let registry = Arc::new(StoreRegistry::new());
    let engine = match registry.open_store(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open store {}: {}", args.store, e);
            std::process::exit(1);
        }
    };

    let outcome = run(args.command, &engine, &registry).await;
    let closed = registry.close_all();

    if let Err(e) = outcome.and(closed) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(
    command: Commands,
    engine: &StorageEngine,
    registry: &Arc<StoreRegistry>,
) -> partstore::Result<()> {
    let store = engine.store_name().to_string();

    match command {
        Commands::Partitions => {
            for id in engine.persisted_partition_ids()? {
                println!("{}", id);
            }
        }
        Commands::Create { partition, read_only } => {
            let config = StoragePartitionConfig::builder(&store, partition)
                .read_only(read_only)
                .build();
            engine.create_storage_partition(&config)?;
            println!("created {}/{}", store, partition);
        }
        Commands::Drop { partition } => {
            engine.drop_storage_partition(partition)?;
            println!("dropped {}/{}", store, partition);
        }
        Commands::Put { partition, key, value } => {
            engine.put(partition, key.as_bytes(), value.as_bytes())?;
            engine.sync(partition)?;
            println!("OK");
        }
        Commands::Get { partition, key } => match engine.get(partition, key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Delete { partition, key } => {
            engine.delete(partition, key.as_bytes())?;
            engine.sync(partition)?;
            println!("OK");
        }
        Commands::Scan { partition, limit } => {
            let entries = engine.entries(partition)?;
            for (key, value) in entries.take(limit.unwrap_or(usize::MAX)) {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Upload { partition, blob_dir } => {
            let manager = start_manager(blob_dir, registry).await?;
            let outcome = manager.put(&store, partition).await;
            manager.close().await?;

            let blob = outcome?;
            println!("uploaded {} (crc32 {:08x})", blob.path.display(), blob.checksum);
        }
        Commands::Bootstrap { partition, blob_dir } => {
            let manager = start_manager(blob_dir, registry).await?;
            let outcome = manager.get(&store, partition).await;
            manager.close().await?;

            match outcome {
                Ok(snapshot) => println!(
                    "bootstrapped {}/{}: {} entries, {} bytes",
                    store,
                    partition,
                    snapshot.entry_count(),
                    snapshot.byte_len()
                ),
                Err(e) if e.should_fall_back() => {
                    println!("no usable snapshot ({}); replay the log to rebuild", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

async fn start_manager(
    blob_dir: PathBuf,
    registry: &Arc<StoreRegistry>,
) -> Result<BlobTransferManager<FsBlobStore>, StoreError> {
    let config = TransferConfig::default();
    let client = FsBlobStore::new(blob_dir, &config);
    let manager = BlobTransferManager::new(client, Arc::clone(registry), config);
    manager.start().await?;
    Ok(manager)
}
