// src/main.rs

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rangedl::prelude::*;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{info, warn};

/// Resumable multi-connection HTTP downloader.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a URL, resuming from chunk files left by an earlier run
    Get(GetArgs),
    /// Delete leftover chunk files in a directory or for one destination file
    Clean {
        location: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct GetArgs {
    url: String,

    /// Destination file or directory
    dest: PathBuf,

    /// Maximum number of parallel connections
    #[arg(short, long, default_value_t = 3)]
    connections: usize,

    /// Nominal chunk size in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    chunk_size: u64,

    /// Attempts per chunk
    #[arg(long, default_value_t = 3)]
    max_retry: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(long, default_value_t = 2000)]
    retry_delay: u64,

    /// Extra delay added per further retry, in milliseconds
    #[arg(long, default_value_t = 3000)]
    retry_backoff: u64,

    /// Minimum time between progress samples, in milliseconds
    #[arg(long, default_value_t = 500)]
    report_interval: u64,

    /// What to do if the destination already exists
    #[arg(long, value_enum, default_value_t = ExistArg::NewFile)]
    exist: ExistArg,

    /// Do not follow redirects
    #[arg(long)]
    no_follow_redirect: bool,

    /// Probe with a ranged GET when the server rejects HEAD
    #[arg(long)]
    head_fallback: bool,

    /// Extra request header, `Name: value`. May be repeated.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Print metadata as JSON instead of drawing a progress bar
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExistArg {
    Overwrite,
    NewFile,
    Ignore,
    Error,
}

impl From<ExistArg> for ExistBehavior {
    fn from(arg: ExistArg) -> Self {
        match arg {
            ExistArg::Overwrite => ExistBehavior::Overwrite,
            ExistArg::NewFile => ExistBehavior::NewFile,
            ExistArg::Ignore => ExistBehavior::Ignore,
            ExistArg::Error => ExistBehavior::Error,
        }
    }
}

impl GetArgs {
    fn options(&self) -> Result<DownloadOptions> {
        Ok(DownloadOptions {
            connections: self.connections,
            exist_behavior: self.exist.into(),
            follow_redirect: !self.no_follow_redirect,
            headers: parse_headers(&self.headers)?,
            chunk_size: ChunkSize::Fixed(self.chunk_size),
            max_retry: self.max_retry,
            retry_delay: Duration::from_millis(self.retry_delay),
            retry_backoff: Duration::from_millis(self.retry_backoff),
            report_interval: Duration::from_millis(self.report_interval),
            head_fallback: self.head_fallback,
        })
    }
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("header `{line}` is not in `Name: value` form"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name in `{line}`"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value in `{line}`"))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    match Cli::parse().command {
        Command::Get(args) => get(args).await,
        Command::Clean { location } => {
            let deleted = clean(&location).await?;
            info!(count = deleted.len(), location = %location.display(), "removed chunk files");
            Ok(())
        }
    }
}

async fn get(args: GetArgs) -> Result<()> {
    let downloader = Downloader::new(args.url.clone(), args.dest.clone(), args.options()?)?;
    let mut events = downloader.subscribe();
    downloader.start();

    let bar = if args.json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )?
            .progress_chars("#>-"),
        );
        bar.set_message("Downloading");
        bar
    };

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                bar.abandon_with_message("Interrupted, chunk files kept for resume");
                downloader.destroy();
                continue;
            }
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        match event {
            DownloadEvent::Metadata(metadata) => {
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&metadata)?);
                }
                bar.set_length(metadata.size);
                if metadata.is_resume {
                    info!(path = %metadata.saved_file_path.display(), "resuming download");
                }
            }
            DownloadEvent::Progress(report) => bar.set_position(report.total.bytes),
            DownloadEvent::Retry(retry) => {
                warn!(chunk = retry.chunk_id, attempt = retry.attempt, error = %retry.error, "retrying chunk");
            }
            DownloadEvent::Build(percentage) => bar.set_message(format!("Building {percentage:.0}%")),
            DownloadEvent::End => bar.finish_with_message("Done"),
            DownloadEvent::Error(error) => bar.abandon_with_message(format!("Failed: {error}")),
            DownloadEvent::Close => break,
        }
    }

    if !downloader.wait().await? {
        bail!("download cancelled");
    }
    info!(path = %downloader.saved_file_path().display(), "saved");
    Ok(())
}
