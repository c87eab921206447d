//! MRC server
//!
//! Loads the configuration, opens the metadata database, registers volumes
//! and OSDs and serves the JSON API until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use mrc::api::{self, AppState};
use mrc::collab::{NoVouchers, OwnerOrSuperuser};
use mrc::osd_client::HttpOsdClient;
use mrc::server::{self, MrcServer};
use mrc_common::MrcConfig;
use mrc_meta_store::MetaStore;
use mrc_placement::OsdRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mrc")]
#[command(about = "Metadata and replica catalog server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/mrc/mrc.toml")]
    config: PathBuf,

    /// Listen address for the JSON API
    #[arg(short, long)]
    listen: Option<String>,

    /// Data directory for the metadata database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// UUID of this MRC
    #[arg(long, env = "MRC_UUID")]
    uuid: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

/// File settings, overridden by `MRC__SECTION__KEY` variables, then by flags
fn load_config(args: &Args) -> Result<MrcConfig> {
    let mut config: MrcConfig = config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(config::Environment::with_prefix("MRC").separator("__"))
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("invalid configuration")?;

    if let Some(listen) = &args.listen {
        config.server.listen.clone_from(listen);
    }
    if let Some(data_dir) = &args.data_dir {
        config.server.data_dir.clone_from(data_dir);
    }
    if let Some(uuid) = &args.uuid {
        config.server.uuid.clone_from(uuid);
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting MRC {}", config.server.uuid);

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.server.data_dir.display()
        )
    })?;
    let store = Arc::new(MetaStore::open(config.server.data_dir.join("mrc.redb"))?);
    server::ensure_volumes(&store, &config.volumes)?;

    let osds = Arc::new(OsdRegistry::new());
    server::register_osds(&store, &osds, &config.osds)?;

    let osd_client = Arc::new(HttpOsdClient::new(
        osds.clone(),
        Duration::from_millis(config.coordinator.invalidate_timeout_ms),
    )?);

    let listen = config.server.listen.clone();
    if let Some(master) = config.redirect_target() {
        info!("Replication master is {}; clients will be redirected", master);
    }
    let mrc = MrcServer::start(
        config,
        store,
        osds,
        osd_client,
        Arc::new(OwnerOrSuperuser),
        Arc::new(NoVouchers),
    )?;

    let app = api::router(AppState {
        stage: mrc.stage(),
        context: mrc.context().clone(),
    });
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!("JSON API listening on {}", listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    mrc.shutdown();
    info!("MRC shut down gracefully");
    Ok(())
}
