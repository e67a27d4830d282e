//! CLI entry point for politodown.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use politodown::download::{DownloadEngine, RetryPolicy, SaveStats};
use politodown::{Credentials, Naming, Portal, RemoteFile, config, server_filename};
use tracing::{debug, info};

mod cli;

use cli::{Args, Command, DownloadArgs, Settings};

/// Environment variable holding the portal password.
const PASSWORD_ENV: &str = "POLITO_PASSWORD";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_config = config::load(args.config.as_deref()).context("failed to load config")?;
    let settings = Settings::resolve(&args, file_config);
    debug!(?settings, "settings resolved");

    let portal = Portal::new(settings.portal_options())?;
    signin(&portal, &settings).await?;

    match &args.command {
        Command::Materials(year) => {
            for material in portal.materials(year.year).await? {
                println!("{}", material.name());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Videostores(year) => {
            for category in portal.videostores(year.year).await? {
                println!("{}", category.name);
                for videostore in &category.videostores {
                    println!("  {}", videostore.name());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::DownloadMaterial(download) => {
            let files = material_files(&portal, download).await?;
            save(&portal, &settings, download, files, args.quiet).await
        }
        Command::DownloadVideos(download) => {
            let files = videolesson_files(&portal, download).await?;
            save(&portal, &settings, download, files, args.quiet).await
        }
    }
}

async fn signin(portal: &Portal, settings: &Settings) -> Result<()> {
    let Some(username) = settings.username.clone() else {
        bail!("no username given: use --username, POLITO_USERNAME, or the config file");
    };
    let password = env::var(PASSWORD_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .with_context(|| format!("{PASSWORD_ENV} is not set"))?;

    portal
        .signin(
            Credentials::new(username, password),
            settings.cookie_file.clone(),
        )
        .await
        .context("sign in failed")
}

async fn material_files(portal: &Portal, download: &DownloadArgs) -> Result<Vec<RemoteFile>> {
    let mut files = Vec::new();
    for material in portal.materials(download.year).await? {
        if !download.selects(material.name()) {
            continue;
        }
        for assignment in material.assignments(portal, false).await? {
            files.extend(assignment.files(portal, true, false).await?);
        }
        info!(material = %material.name(), files = files.len(), "material listed");
    }
    Ok(files)
}

async fn videolesson_files(portal: &Portal, download: &DownloadArgs) -> Result<Vec<RemoteFile>> {
    let mut files = Vec::new();
    for category in portal.videostores(download.year).await? {
        for videostore in &category.videostores {
            if !download.selects(videostore.name()) {
                continue;
            }
            files.extend(videostore.videolessons(portal, false).await?);
            info!(videostore = %videostore.name(), files = files.len(), "videostore listed");
        }
    }
    Ok(files)
}

async fn save(
    portal: &Portal,
    settings: &Settings,
    download: &DownloadArgs,
    files: Vec<RemoteFile>,
    quiet: bool,
) -> Result<ExitCode> {
    if files.is_empty() {
        info!("nothing to download");
        return Ok(ExitCode::SUCCESS);
    }

    let engine = DownloadEngine::new(
        settings.concurrency,
        RetryPolicy::with_max_retries(settings.max_retries),
    )?;

    let progress = byte_progress(quiet);
    let bar = progress.clone();
    let naming: Arc<Naming> = Arc::new(server_filename);

    let stats = engine
        .save_all(
            portal,
            files,
            &settings.output_dir,
            naming,
            download.overwrite,
            Arc::new(move |n: u64| bar.inc(n)),
        )
        .await?;
    progress.finish_and_clear();

    print_summary(&stats, quiet);
    Ok(if stats.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn byte_progress(quiet: bool) -> ProgressBar {
    let bar = ProgressBar::no_length();
    if quiet {
        bar.set_draw_target(ProgressDrawTarget::hidden());
    }
    bar.set_style(
        ProgressStyle::with_template("{spinner} {bytes} downloaded ({binary_bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn print_summary(stats: &SaveStats, quiet: bool) {
    info!(
        downloaded = stats.downloaded,
        up_to_date = stats.up_to_date,
        skipped = stats.skipped,
        failed = stats.failed,
        retried = stats.retried,
        bytes = stats.bytes,
        "download complete"
    );
    if !quiet {
        println!(
            "{} downloaded, {} up to date, {} skipped, {} failed ({} bytes)",
            stats.downloaded, stats.up_to_date, stats.skipped, stats.failed, stats.bytes
        );
    }
}
