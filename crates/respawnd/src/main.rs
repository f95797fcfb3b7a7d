mod cli;
mod error;
mod logging;
mod settings;
mod single_instance;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, warn};
use respawn_core::{
    DrainOutcome, Mode, Restarter, RunningIdentity, Scheduler, UpdateError, UpdateOutcome,
    Updater,
};
use respawn_platform::{AppPaths, Target};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands, GlobalOpts};
use crate::error::AppError;
use crate::settings::DaemonSettings;
use crate::single_instance::SingleInstance;

const APP_NAME: &str = "respawnd";
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("{APP_NAME}: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), AppError> {
    let paths = AppPaths::new(APP_NAME)?;
    let settings_path = cli
        .global
        .config_file
        .clone()
        .unwrap_or_else(|| paths.settings_file());
    let settings = DaemonSettings::load(&settings_path)?;
    paths
        .ensure_dirs()
        .map_err(|error| AppError::io("failed to create app directories", error))?;
    logging::init_logging(
        &paths.log_file(),
        settings.debug_logging,
        settings.max_log_size_bytes,
    );

    let identity = build_identity(&settings, &cli.global);
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Vars = command {
        for (key, value) in identity.vars() {
            println!("{key}={value}");
        }
        return Ok(());
    }

    if let Commands::Run = command {
        // the restart marker doubles as a grace period for a spawned
        // predecessor to exit and release the instance lock
        let restarted = respawn_core::startup_delay().await;
        let _instance = SingleInstance::acquire(&paths.lock_file())?;
        let updater = Updater::builder(identity)
            .config(settings.updater_config())
            .restarter(settings.restarter())
            .build()?;
        return run_daemon(updater, &paths, restarted).await;
    }

    let _instance = SingleInstance::acquire(&paths.lock_file())?;
    let updater = Updater::builder(identity)
        .config(settings.updater_config())
        .restarter(Arc::new(NextStart))
        .build()?;

    match command {
        Commands::Check => check(&updater).await,
        Commands::Switch { channel } => {
            switch(&updater, settings, &settings_path, &channel).await
        }
        Commands::Fetch { output } => fetch(&updater, &output).await,
        Commands::Run | Commands::Vars => Ok(()),
    }
}

fn build_identity(settings: &DaemonSettings, global: &GlobalOpts) -> RunningIdentity {
    let project_name = settings
        .project_name
        .as_deref()
        .or(option_env!("RESPAWN_PROJECT_NAME"))
        .or(Some(env!("CARGO_PKG_NAME")));
    let channel = global
        .channel
        .clone()
        .or_else(|| settings.channel.clone())
        .unwrap_or_default();
    let host = global
        .host
        .clone()
        .or_else(|| settings.host.clone())
        .or_else(|| option_env!("RESPAWN_DEFAULT_HOST").map(str::to_string))
        .unwrap_or_default();
    let mode = settings
        .mode()
        .or_else(|| option_env!("RESPAWN_MODE").and_then(|mode| mode.parse::<Mode>().ok()))
        .unwrap_or_default();

    RunningIdentity::from_build(
        project_name,
        option_env!("RESPAWN_GIT_REVISION"),
        option_env!("RESPAWN_VCS_TIME"),
    )
    .with_channel(channel)
    .with_host(host)
    .with_mode(mode)
}

async fn run_daemon(
    updater: Arc<Updater>,
    paths: &AppPaths,
    restarted: bool,
) -> Result<(), AppError> {
    respawn_core::cleanup_previous_install(updater.executable());

    let identity = updater.identity();
    info!(
        "{APP_NAME} {}/{} starting (project {}, channel {}, mode {})",
        identity.date_tag(),
        identity.git_tag(),
        identity.project_name(),
        identity.channel(),
        identity.mode()
    );

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(Arc::clone(&updater), restarted)
        .and_then(|scheduler| scheduler.spawn(cancel.clone()));
    let status = tokio::spawn(report_status(
        Arc::clone(&updater),
        paths.data_dir.join("status.json"),
        cancel.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .map_err(|error| AppError::io("failed to wait for shutdown signal", error))?;
    info!("Shutting down");
    cancel.cancel();

    if let Some(scheduler) = scheduler
        && let Err(err) = scheduler.await
    {
        warn!("Auto-updater task ended abnormally: {err}");
    }
    if let Err(err) = status.await {
        warn!("Status task ended abnormally: {err}");
    }

    if let DrainOutcome::TimedOut { outstanding } =
        updater.barrier().acquire_exclusive().await.outcome()
    {
        warn!("Exiting with {outstanding} operation(s) still busy");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    pid: u32,
    project_name: String,
    git_tag: String,
    date_tag: String,
    channel: String,
    executable: PathBuf,
    target: Target,
}

impl StatusReport {
    fn collect(updater: &Updater) -> Self {
        let identity = updater.identity();
        Self {
            pid: std::process::id(),
            project_name: identity.project_name().to_string(),
            git_tag: identity.git_tag().to_string(),
            date_tag: identity.date_tag().to_string(),
            channel: identity.channel(),
            executable: updater.executable().to_path_buf(),
            target: updater.config().target.clone(),
        }
    }
}

/// Periodically rewrite the status file. Each write is marked busy so a
/// restart never leaves a half-written report behind.
async fn report_status(updater: Arc<Updater>, path: PathBuf, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let _busy = updater.enter();
        match serde_json::to_vec_pretty(&StatusReport::collect(&updater)) {
            Ok(body) => {
                if let Err(err) = tokio::fs::write(&path, body).await {
                    warn!("Failed to write status file {}: {err}", path.display());
                }
            }
            Err(err) => warn!("Failed to encode status report: {err}"),
        }
        debug!("Status written to {}", path.display());
    }
}

/// Restart strategy for one-shot commands: the installed build takes over
/// the next time the daemon is started.
struct NextStart;

impl Restarter for NextStart {
    fn restart(&self, executable: &Path, _delay: Duration) -> Result<(), UpdateError> {
        info!(
            "New build installed at {}, it runs from the next start",
            executable.display()
        );
        Ok(())
    }
}

async fn check(updater: &Updater) -> Result<(), AppError> {
    match updater.check_for_update().await? {
        UpdateOutcome::UpToDate(version) => {
            println!("up to date: {} ({})", version.git_tag, version.channel);
        }
        UpdateOutcome::AlreadyRunning => println!("an update check is already running"),
        UpdateOutcome::Restarted(version) => {
            println!("installed {} ({})", version.git_tag, version.date_tag);
        }
    }
    Ok(())
}

async fn switch(
    updater: &Updater,
    mut settings: DaemonSettings,
    settings_path: &Path,
    channel: &str,
) -> Result<(), AppError> {
    if !updater.switch_channel(channel).await? {
        println!("already on the latest build of {channel}");
        return Ok(());
    }
    settings.channel = Some(updater.identity().channel());
    settings.save(settings_path)?;
    println!("switched to {channel}");
    Ok(())
}

async fn fetch(updater: &Updater, output: &Path) -> Result<(), AppError> {
    let channel = updater.identity().channel();
    let version = updater.latest(&channel).await?;
    let created = !output.exists();
    if created {
        std::fs::File::create(output)
            .map_err(|error| AppError::io("failed to create output file", error))?;
    }
    if let Err(err) = updater.save_as(&version, output).await {
        if created && let Err(cleanup) = std::fs::remove_file(output) {
            warn!("Failed to remove {}: {cleanup}", output.display());
        }
        return Err(err.into());
    }
    println!(
        "saved {} ({}) to {}",
        version.git_tag,
        version.channel,
        output.display()
    );
    Ok(())
}
