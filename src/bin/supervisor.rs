//! Supervisor binary
//!
//! Runs the configured harvest jobs indefinitely, each as its own child
//! process. A job is restarted after every exit, clean or not, with the
//! configured interval in between. Child output is streamed line by line
//! with a `[job-name]` prefix so interleaved jobs stay readable.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use depth_harvest_lib::infrastructure::config::JobConfig;
use depth_harvest_lib::infrastructure::{ConfigManager, HarvestConfig, init_logging_with_config};

#[derive(Debug, Parser)]
#[command(
    name = "supervisor",
    author,
    version,
    about = "Restarts harvest jobs on a fixed interval"
)]
struct Cli {
    /// Seconds between job cycles (defaults to the configured interval)
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new()?;
    let config = config_manager.initialize_on_first_run().await?;

    // Jobs own the log files; the supervisor stays on the console.
    let mut logging = config.logging.clone();
    logging.file_output = false;
    init_logging_with_config(logging)?;

    let interval = Duration::from_secs(
        cli.interval
            .unwrap_or(config.supervisor.interval_seconds),
    );
    let jobs = resolve_jobs(&config)?;

    info!(
        "🧭 supervisor starting: {} job(s), interval {}s",
        jobs.len(),
        interval.as_secs()
    );
    for job in &jobs {
        info!("📋 job '{}': {} {}", job.name, job.command, job.args.join(" "));
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        handles.push(tokio::spawn(run_job(job, interval, cancel.clone())));
    }
    for handle in handles {
        let _ = handle.await;
    }

    info!("👋 supervisor exiting");
    Ok(())
}

/// Configured jobs, or one default harvest job next to this executable.
fn resolve_jobs(config: &HarvestConfig) -> Result<Vec<JobConfig>> {
    if !config.supervisor.jobs.is_empty() {
        return Ok(config.supervisor.jobs.clone());
    }

    let exe = std::env::current_exe().context("Failed to locate the supervisor executable")?;
    let bin_dir = exe
        .parent()
        .context("Supervisor executable has no parent directory")?;
    let instruments = ConfigManager::get_app_data_dir()?.join("instruments.txt");

    Ok(vec![JobConfig {
        name: "harvest".to_string(),
        command: bin_dir.join("depth-harvest").to_string_lossy().into_owned(),
        args: vec![
            "--instruments".to_string(),
            instruments.to_string_lossy().into_owned(),
        ],
    }])
}

/// One job's restart loop. Failures are logged and the job restarts next
/// cycle; nothing a job does can take the supervisor down.
async fn run_job(job: JobConfig, interval: Duration, cancel: CancellationToken) {
    let mut cycle: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            info!("🛑 [{}] stopping after {} cycles", job.name, cycle);
            return;
        }
        cycle += 1;
        info!("🚀 [{}] starting cycle {}", job.name, cycle);

        match spawn_job(&job) {
            Ok(mut child) => {
                if let Some(stdout) = child.stdout.take() {
                    stream_lines(stdout, job.name.clone(), false);
                }
                if let Some(stderr) = child.stderr.take() {
                    stream_lines(stderr, job.name.clone(), true);
                }

                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) if status.success() => {
                            info!("✅ [{}] exited cleanly", job.name);
                        }
                        Ok(status) => {
                            warn!("⚠️ [{}] exited with {}", job.name, status);
                        }
                        Err(e) => {
                            error!("⚠️ [{}] wait failed: {}", job.name, e);
                        }
                    },
                    () = cancel.cancelled() => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        info!("🛑 [{}] terminated", job.name);
                        return;
                    }
                }
            }
            Err(e) => {
                error!("⚠️ [{}] failed to start: {:#}", job.name, e);
            }
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = cancel.cancelled() => {
                info!("🛑 [{}] stopping after {} cycles", job.name, cycle);
                return;
            }
        }
    }
}

fn spawn_job(job: &JobConfig) -> Result<tokio::process::Child> {
    // Children must not outlive the supervisor.
    Command::new(&job.command)
        .args(&job.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn '{}' for job '{}'", job.command, job.name))
}

fn stream_lines<R>(reader: R, name: String, to_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if to_stderr {
                eprintln!("[{name}] {line}");
            } else {
                println!("[{name}] {line}");
            }
        }
    });
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("🛑 termination signal received, stopping jobs");
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
