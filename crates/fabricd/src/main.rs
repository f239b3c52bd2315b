//! fabricd entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fabric_common::{EntityStore, HttpDeviceClient, MemoryStore, RedisConfig, RedisStore};
use fabric_topology::UdpSnmpWalker;
use fabricd::config::{FabricConfig, StoreBackend, DEFAULT_CONFIG_PATH};
use fabricd::{rest_api, Fabric};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fabricd", version, about = "ToR fabric control daemon")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the REST listen address
    #[arg(long)]
    listen: Option<String>,

    /// Override the log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = FabricConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate().context("validating configuration")?;

    init_logging(&config)?;
    info!(config = %args.config.display(), "fabricd starting");

    if let Err(e) = run(config).await {
        error!(error = %e, "fabricd exiting with error");
        return Err(e);
    }
    info!("fabricd exiting normally");
    Ok(())
}

fn init_logging(config: &FabricConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("building log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);
    let installed = if config.logging.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))
}

async fn open_store(config: &FabricConfig) -> Result<Arc<dyn EntityStore>> {
    let store: Arc<dyn EntityStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory entity store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Redis => {
            let redis = RedisConfig::new(
                config.store.redis_host.clone(),
                config.store.redis_port,
                config.store.redis_db,
            );
            info!(host = %redis.host, port = redis.port, db = redis.db, "Using Redis entity store");
            Arc::new(RedisStore::connect(redis).await?)
        }
    };
    Ok(store)
}

async fn run(config: FabricConfig) -> Result<()> {
    let listen_addr = config.listen_addr()?;
    let store = open_store(&config).await?;
    let transport = Arc::new(HttpDeviceClient::new(config.device_client_config()));
    let walker = Arc::new(UdpSnmpWalker::new());

    let fabric = Arc::new(Fabric::new(config, store, walker, transport)?);
    let restored = fabric.start().await?;
    info!(restored, "Allocator state restored");

    let shutdown = fabric.shutdown_token();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    shutdown.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    });

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding {}", listen_addr))?;
    info!(addr = %listen_addr, "REST surface listening");

    let served = axum::serve(listener, rest_api::router(fabric.clone()))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    fabric.shutdown().await;
    served.context("serving REST surface")
}
