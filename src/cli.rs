//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use politodown::PortalOptions;
use politodown::config::FileConfig;
use politodown::download::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};

/// Download materials and videolessons from the Polito teaching portal.
///
/// The password is read from the `POLITO_PASSWORD` environment variable.
#[derive(Parser, Debug)]
#[command(name = "politodown")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/politodown/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Portal username
    #[arg(short, long, env = "POLITO_USERNAME", global = true)]
    pub username: Option<String>,

    /// Netscape cookie file that keeps the session between runs
    #[arg(long, value_name = "PATH", global = true)]
    pub cookie_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the course materials of an academic year
    Materials(YearArgs),
    /// List the videostores of an academic year, grouped by category
    Videostores(YearArgs),
    /// Download every document of the selected course materials
    DownloadMaterial(DownloadArgs),
    /// Download every videolesson of the selected videostores
    DownloadVideos(DownloadArgs),
}

#[derive(ClapArgs, Debug)]
pub struct YearArgs {
    /// Academic year (e.g. 2023 for 2023/24)
    #[arg(short, long)]
    pub year: u16,
}

#[derive(ClapArgs, Debug)]
pub struct DownloadArgs {
    /// Academic year (e.g. 2023 for 2023/24)
    #[arg(short, long)]
    pub year: u16,

    /// Only courses whose name contains this text (case-insensitive, repeatable)
    #[arg(long = "course", value_name = "NAME")]
    pub courses: Vec<String>,

    /// Output directory (default: config `output_dir`, then the current directory)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Download files even when the local copy is up to date
    #[arg(long)]
    pub overwrite: bool,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,
}

impl DownloadArgs {
    /// Whether a course name passes the `--course` filters.
    pub fn selects(&self, name: &str) -> bool {
        if self.courses.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        self.courses
            .iter()
            .any(|course| name.contains(&course.trim().to_lowercase()))
    }
}

/// Effective settings once flags and the config file are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub username: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub throttle_delay: Duration,
}

impl Settings {
    /// Merges flags over the file config over built-in defaults.
    #[allow(clippy::cast_possible_truncation)]
    pub fn resolve(args: &Args, file: FileConfig) -> Self {
        let defaults = PortalOptions::default();
        let download = match &args.command {
            Command::DownloadMaterial(download) | Command::DownloadVideos(download) => {
                Some(download)
            }
            Command::Materials(_) | Command::Videostores(_) => None,
        };

        let output_dir = download
            .and_then(|d| d.output.clone())
            .or(file.output_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        let concurrency = download
            .and_then(|d| d.concurrency)
            .map(usize::from)
            .or(file.concurrency.map(|c| c as usize))
            .unwrap_or(DEFAULT_CONCURRENCY);
        let max_retries = download
            .and_then(|d| d.max_retries)
            .map(u32::from)
            .or(file.max_retries.map(|r| r as u32))
            .unwrap_or(DEFAULT_MAX_RETRIES);

        Self {
            username: args.username.clone().or(file.username),
            cookie_file: args.cookie_file.clone().or(file.cookie_file),
            output_dir,
            concurrency,
            max_retries,
            connect_timeout: file
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            read_timeout: file
                .read_timeout_secs
                .map_or(defaults.read_timeout, Duration::from_secs),
            throttle_delay: file
                .throttle_delay_ms
                .map_or(defaults.throttle_delay, Duration::from_millis),
        }
    }

    /// Portal options carrying the configured timeouts.
    pub fn portal_options(&self) -> PortalOptions {
        PortalOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            throttle_delay: self.throttle_delay,
            max_in_flight: self.concurrency.max(PortalOptions::default().max_in_flight),
            ..PortalOptions::default()
        }
    }
}
