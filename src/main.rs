//! Depth Harvest binary
//!
//! One harvest run (or a cycle loop with `--loop`) against the configured
//! depth source. The Supervisor binary is the production entry point; this
//! binary is what it runs.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use depth_harvest_lib::harvesting::{
    ArtifactPolicy, HarvestRunner, LoginFlow, RequestPacer, RunnerSettings, SessionManager,
    TaskSettings,
};
use depth_harvest_lib::infrastructure::{
    ConfigManager, DepthStore, HarvestConfig, HttpFetchLauncher, HttpFetchSettings, HttpLoginFlow,
    StoredStateFlow, init_logging_with_config, load_instrument_file, log_system_info,
};

/// 📈 Depth Harvest - concurrent order-book depth snapshot engine
#[derive(Debug, Parser)]
#[command(
    name = "depth-harvest",
    author,
    version,
    about = "Concurrent order-book depth harvesting engine"
)]
struct Cli {
    /// Instrument list file (one code per line, `#` comments)
    #[arg(short, long, value_name = "FILE")]
    instruments: PathBuf,

    /// Override the configured worker count
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Run cycles back-to-back instead of a single run
    #[arg(long = "loop")]
    run_loop: bool,

    /// Seconds between cycles in loop mode (overrides config)
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,

    /// Sink database URL (overrides config)
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new()?;
    let mut config = config_manager.initialize_on_first_run().await?;

    init_logging_with_config(config.logging.clone())?;
    log_system_info();

    if let Some(workers) = cli.workers {
        config.workers.num_workers = workers;
    }
    if let Some(interval) = cli.interval {
        config.supervisor.interval_seconds = interval;
    }
    if let Some(url) = cli.database_url {
        config.sink.database_url = Some(url);
    }

    if config.source.depth_endpoint.is_empty() {
        bail!(
            "source.depth_endpoint is not configured (edit {})",
            config_manager.config_path().display()
        );
    }

    let instruments = load_instrument_file(&cli.instruments).await?;

    let database_url = config.resolved_database_url()?;
    let store = Arc::new(
        DepthStore::new(&database_url, config.sink.max_connections)
            .await
            .context("Failed to open depth store")?,
    );
    store.migrate().await.context("Failed to migrate depth store")?;

    let flow = build_login_flow(&config)?;
    let session = Arc::new(SessionManager::new(
        flow,
        Duration::from_secs(config.session.login_timeout_seconds),
    ));

    let pacer = Arc::new(RequestPacer::new(
        config.pacing.requests_per_second,
        config.pacing.request_delay_ms,
        config.pacing.request_jitter_ms,
    ));
    let launcher = Arc::new(HttpFetchLauncher::new(
        HttpFetchSettings::new(
            &config.source.depth_endpoint,
            Duration::from_secs(config.source.page_timeout_seconds),
        ),
        pacer,
    ));

    let artifacts = config
        .resolved_artifact_dir()?
        .map(|directory| ArtifactPolicy { directory });

    let settings = RunnerSettings {
        num_workers: config.workers.num_workers,
        max_concurrent_per_worker: config.workers.max_concurrent_per_worker,
        task: TaskSettings {
            policy: config.retry.to_policy(),
            blocked_resources: config.source.blocked_resources.clone(),
            content_timeout: Duration::from_secs(config.source.content_timeout_seconds),
            artifacts,
        },
        failure_log_dir: Some(ConfigManager::get_app_data_dir()?.join("logs")),
        interval: Duration::from_secs(config.supervisor.interval_seconds),
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let runner = HarvestRunner::new(session, launcher, store, settings, cancel);

    if cli.run_loop {
        runner.run_cycles(&instruments).await;
    } else {
        let result = runner.run_once(&instruments).await?;
        if !result.failures.is_empty() {
            warn!(
                "run completed with {} failed instruments",
                result.failures.len()
            );
        }
    }

    info!("👋 depth-harvest exiting");
    Ok(())
}

fn build_login_flow(config: &HarvestConfig) -> Result<Arc<dyn LoginFlow>> {
    if let Some(path) = &config.session.auth_state_path {
        info!("using stored auth state flow: {}", path.display());
        return Ok(Arc::new(StoredStateFlow::new(path)));
    }
    if !config.session.login_endpoint.is_empty() {
        info!("using HTTP login flow: {}", config.session.login_endpoint);
        let flow = HttpLoginFlow::new(
            &config.session.login_endpoint,
            Duration::from_secs(config.session.login_timeout_seconds),
        )?;
        return Ok(Arc::new(flow));
    }
    bail!("no login flow configured: set session.auth_state_path or session.login_endpoint")
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("🛑 termination signal received, winding down");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
