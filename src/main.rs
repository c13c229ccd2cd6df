use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use ouroboros_offline::cache::{
    CacheStorage, CacheStoreManager, DiskStorage, MemoryStorage, PartitionSet,
};
use ouroboros_offline::config::ControllerConfig;
use ouroboros_offline::controller::InterceptionController;
use ouroboros_offline::fetch::{Fetcher, HttpFetcher};
use ouroboros_offline::platform::StandalonePlatform;
use ouroboros_offline::policy::ExclusionRule;
use ouroboros_offline::proxy::{ProxyServer, ProxyServerConfig};

#[derive(Parser)]
#[command(name = "ouroboros-offline")]
#[command(about = "Stale-while-revalidate caching proxy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve an upstream origin through the cache controller
    Serve {
        /// Upstream origin to forward requests to
        #[arg(short, long)]
        upstream: Url,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Persist partitions under this directory (in-memory if omitted)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Controller version tag
        #[arg(long)]
        version: Option<String>,

        /// Resource to pre-populate on install (repeatable)
        #[arg(long)]
        precache: Vec<String>,

        /// URL substring that bypasses the cache (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// List cache partitions
    Partitions {
        /// Cache directory
        #[arg(long)]
        cache_dir: PathBuf,
    },

    /// Delete every partition not owned by the given version
    Gc {
        /// Cache directory
        #[arg(long)]
        cache_dir: PathBuf,

        /// Version to keep
        #[arg(long)]
        version: Option<String>,
    },

    /// Delete the named partitions
    Evict {
        /// Cache directory
        #[arg(long)]
        cache_dir: PathBuf,

        /// Partitions to delete
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ouroboros_offline=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ControllerConfig::from_env()?;

    match cli.command {
        Commands::Serve {
            upstream,
            host,
            port,
            cache_dir,
            version,
            precache,
            exclude,
        } => {
            if std::env::var("OFFLINE_SCOPE_URL").is_err() {
                config.scope_url = upstream.clone();
            }
            if let Some(version) = version {
                config.version = version;
            }
            if !precache.is_empty() {
                config.precache = precache;
            }
            config
                .exclusions
                .extend(exclude.into_iter().map(ExclusionRule::Contains));

            let storage = open_storage(cache_dir, config.max_size_bytes).await?;
            let store = CacheStoreManager::new(storage);
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);

            let controller = InterceptionController::new(
                config,
                store,
                fetcher.clone(),
                Arc::new(StandalonePlatform::new()),
            )?;

            let server = ProxyServer::new(
                ProxyServerConfig { host, port, upstream },
                Arc::new(controller),
                fetcher,
            );
            server.start().await?;
        }

        Commands::Partitions { cache_dir } => {
            let store = CacheStoreManager::new(Arc::new(DiskStorage::open_root(&cache_dir).await?));
            let names = store.list_partition_names().await?;
            if names.is_empty() {
                println!("No partitions in {:?}", cache_dir);
            }
            for name in names {
                let entries = store.open_partition(&name).await?.len().await?;
                let marker = if config.designated_partitions().contains(&name) { "*" } else { " " };
                println!("{} {} ({} entries)", marker, name, entries);
            }
        }

        Commands::Gc { cache_dir, version } => {
            if let Some(version) = version {
                config.version = version;
            }
            let store = CacheStoreManager::new(Arc::new(DiskStorage::open_root(&cache_dir).await?));
            let event = store
                .retain_partitions(&PartitionSet::new(config.designated_partitions()))
                .await?;

            println!("Deleted {} partition(s)", event.partitions.len());
            for name in &event.partitions {
                println!("  - {}", name);
            }
            for name in &event.failed {
                println!("  ! {} (failed)", name);
            }
        }

        Commands::Evict { cache_dir, names } => {
            let store = CacheStoreManager::new(Arc::new(DiskStorage::open_root(&cache_dir).await?));
            let event = store.evict_partitions(&names).await?;
            println!("Evicted {} partition(s) ({})", event.partitions.len(), event.reason);
            for name in &event.failed {
                println!("  ! {} (failed)", name);
            }
        }
    }

    Ok(())
}

async fn open_storage(
    cache_dir: Option<PathBuf>,
    quota: Option<usize>,
) -> Result<Arc<dyn CacheStorage>> {
    let storage: Arc<dyn CacheStorage> = match (cache_dir, quota) {
        (Some(dir), Some(limit)) => Arc::new(DiskStorage::open_root(dir).await?.with_quota(limit)),
        (Some(dir), None) => Arc::new(DiskStorage::open_root(dir).await?),
        (None, Some(limit)) => Arc::new(MemoryStorage::with_quota(limit)),
        (None, None) => Arc::new(MemoryStorage::new()),
    };
    Ok(storage)
}
