use clap::Parser;
use pkg_constants::paths::{DEFAULT_CONTROLLER_CONFIG, DEFAULT_CONTROLLER_DATA_DIR};
use pkg_constants::state::DEFAULT_RESYNC_SECS;
use pkg_controllers::service::{
    ServiceController, ServiceResync, StoreDeployments, StorePods, StoreServiceHooks,
};
use pkg_scheduler::Scheduler;
use pkg_state::client::StateStore;
use pkg_types::config::{ControllerConfigFile, load_config_file};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rollr-controller", about = "rollr deployment controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONTROLLER_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Seconds between full resyncs of the store
    #[arg(long)]
    resync_secs: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ControllerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    let log_level = cli
        .log_level
        .or(file_cfg.log_level)
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_CONTROLLER_DATA_DIR.to_string());
    let resync_secs = cli
        .resync_secs
        .or(file_cfg.resync_secs)
        .unwrap_or(DEFAULT_RESYNC_SECS);

    info!("Starting rollr-controller");
    info!("  Config:    {}", cli.config);
    info!("  Data dir:  {}", data_dir);
    info!("  Resync:    {}s", resync_secs);

    let store = StateStore::new(&data_dir).await?;
    let controller = ServiceController::new(
        Arc::new(StoreDeployments::new(store.clone())),
        Arc::new(StorePods::new(store.clone(), Arc::new(Scheduler::new()))),
        Arc::new(StoreServiceHooks::new(store.clone())),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let resync = ServiceResync::new(
        store.clone(),
        controller,
        Duration::from_secs(resync_secs),
    )
    .start(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down rollr-controller");
    // Workers finish their current pass before the store goes away.
    let _ = shutdown_tx.send(true);
    resync.await?;
    store.close().await?;

    Ok(())
}
