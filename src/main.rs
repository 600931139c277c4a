#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail, ensure};
use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use limiter::HostLimiter;
use session::Session;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use url::Url;

pub mod download;
pub mod error;
pub mod fetch;
pub mod ffmpeg;
pub mod limiter;
pub mod playlist;
pub mod session;
pub mod util;

/// Downloads or records HLS streams described by m3u/m3u8 playlists
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Playlist URLs (or, with --force, pages embedding one) to process
    #[arg(required = true)]
    urls: Vec<String>,

    /// Recording duration as `HH:MM` or whole minutes; reads stop at the cutoff
    #[arg(short, long)]
    duration: Option<String>,

    /// Output file name template, supports strftime substitutions
    #[arg(short, long)]
    output: Option<String>,

    /// Directory where the final file is written
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Override the output container extension
    #[arg(short = 't', long = "type")]
    ext: Option<String>,

    /// Scan HTML pages for an embedded playlist URL
    #[arg(short, long, default_value_t = false)]
    force: bool,

    /// The amount of parallel downloads per host
    #[arg(short, long, default_value_t = 4)]
    parallelism: usize,

    /// Directory where segments are processed (defaults to system's temporary directory)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug detail
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.quiet {
        LevelFilter::WARN
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    assert!((ffmpeg::is_installed().await), "ffmpeg is not installed!");
    util::warn_ulimit();

    let record_for = args
        .duration
        .as_deref()
        .map(session::parse_duration)
        .transpose()?;

    let work_dir = args.work_dir.clone().map_or_else(std::env::temp_dir, |p| {
        if p.is_dir() {
            return p;
        }
        panic!("Provided work directory is not a valid directory!");
    });

    let client = util::init_http_client();
    let ct = CancellationToken::new();
    util::spawn_ct_watcher(ct.clone());
    let limiter = Arc::new(HostLimiter::new(args.parallelism));

    let mut failures = 0_usize;
    for raw_url in &args.urls {
        match process_url(&client, &args, raw_url, record_for, &work_dir, &limiter, &ct).await {
            Ok(path) => info!("Finished {raw_url}: {path:?}"),
            Err(e) => {
                error!("Processing {raw_url} failed: {e:#}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} URL(s) failed", args.urls.len());
    }
    Ok(())
}

/// Resolves, downloads and reassembles one top-level URL.
async fn process_url(
    client: &reqwest::Client,
    args: &Args,
    raw_url: &str,
    record_for: Option<Duration>,
    work_dir: &Path,
    limiter: &Arc<HostLimiter>,
    ct: &CancellationToken,
) -> Result<PathBuf> {
    let url = Url::parse(raw_url).context("Parsing input URL")?;

    let media = playlist::resolve(client, url.clone(), args.force).await?;
    ensure!(
        !media.segment_uris.is_empty(),
        "Media playlist carries no segments"
    );
    info!("Found {} segments to download!", media.segment_uris.len());

    let file_name = session::output_file_name(
        &url,
        args.output.as_deref(),
        args.ext.as_deref(),
        media.segment_uris.first().map(String::as_str),
        &Local::now(),
    );
    let session = Session::new(work_dir, args.output_dir.join(file_name), record_for);

    let plan = download::plan_segments(&media, &session)?;
    let needs_reassembly = plan.len() > 1;
    if needs_reassembly {
        session.create_scratch_dir().await?;
        info!(
            "Downloading into {:?} with {} parallel requests per host",
            session.scratch_dir, args.parallelism
        );
    }

    let pb = ProgressBar::new(plan.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap(),
    );

    let summary = download::run(client, plan, &session, limiter.clone(), ct, pb).await;
    if summary.failed_count() > 0 {
        warn!(
            "{} of {} segments did not complete; the output will be partial",
            summary.failed_count(),
            summary.files.len()
        );
    } else {
        info!("Done downloading all segments!");
    }

    if needs_reassembly {
        info!("Concatenating segments now");
        let manifest = session.scratch_dir.join("concat.txt");
        // A failed concat returns here, leaving the scratch dir for diagnosis.
        ffmpeg::concat_segments(&summary.files, &manifest, &session.output_path).await?;
        session.teardown().await?;
        info!("Successfully concatenated segments!");
    }

    Ok(session.output_path)
}
