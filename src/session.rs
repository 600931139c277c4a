use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail, ensure};
use chrono::{DateTime, Local};
use tokio::time::Instant;
use tracing::warn;
use url::Url;

/// Per-invocation state: one `Session` per top-level URL processed.
///
/// `stop_at` is only set in recording mode; the scratch directory holds
/// intermediate segment files and is removed after successful reassembly.
#[derive(Debug)]
pub struct Session {
    pub started_at: DateTime<Local>,
    pub stop_at: Option<Instant>,
    pub scratch_dir: PathBuf,
    pub output_path: PathBuf,
}

impl Session {
    pub fn new(work_dir: &Path, output_path: PathBuf, record_for: Option<Duration>) -> Self {
        let started_at = Local::now();
        let scratch_dir = work_dir.join(format!("hlsgrab-{}", started_at.timestamp_millis()));
        Self {
            started_at,
            stop_at: record_for.map(|d| Instant::now() + d),
            scratch_dir,
            output_path,
        }
    }

    pub async fn create_scratch_dir(&self) -> Result<()> {
        match tokio::fs::create_dir_all(&self.scratch_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("Scratch folder already exists. Was there an uncompleted download?");
                Ok(())
            }
            Err(e) => bail!(e),
        }
    }

    /// Removes the scratch directory and everything in it. Not called on
    /// reassembly failure, so partial output stays around for diagnosis.
    pub async fn teardown(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.scratch_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => bail!(e),
        }
    }
}

/// Parses a recording duration given either as `HH:MM` or as whole minutes.
pub fn parse_duration(input: &str) -> Result<Duration> {
    if let Some((hours, minutes)) = input.split_once(':') {
        let hours: u64 = hours.parse().context("Parsing duration hours")?;
        let minutes: u64 = minutes.parse().context("Parsing duration minutes")?;
        ensure!(minutes < 60, "Minutes component must be below 60");
        return Ok(Duration::from_secs(hours * 3600 + minutes * 60));
    }

    let minutes: u64 = input
        .parse()
        .context("Duration must be `HH:MM` or a number of minutes")?;
    Ok(Duration::from_secs(minutes * 60))
}

/// Builds the final output file name.
///
/// The name template supports strftime-style time substitution. When no
/// template is given the name falls back to the playlist URL's file stem.
/// The extension comes from the explicit override, then the first segment's
/// extension, then `mp4`; a template that already carries an extension is
/// kept verbatim.
pub fn output_file_name(
    url: &Url,
    template: Option<&str>,
    ext_override: Option<&str>,
    first_segment_uri: Option<&str>,
    now: &DateTime<Local>,
) -> String {
    let stem = template.map_or_else(|| default_stem(url), |t| now.format(t).to_string());

    if ext_override.is_none() && Path::new(&stem).extension().is_some() {
        return stem;
    }

    let ext = ext_override
        .map(str::to_string)
        .or_else(|| first_segment_uri.and_then(segment_extension))
        .unwrap_or_else(|| "mp4".to_string());
    format!("{stem}.{ext}")
}

fn default_stem(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| !last.is_empty())
        .map(|last| {
            Path::new(last)
                .file_stem()
                .map_or_else(|| last.to_string(), |s| s.to_string_lossy().into_owned())
        })
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "stream".to_string())
}

fn segment_extension(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 27, 21, 30, 0).unwrap()
    }

    #[test]
    fn parses_hh_mm_duration() {
        assert_eq!(
            parse_duration("1:30").unwrap(),
            Duration::from_secs(90 * 60)
        );
        assert_eq!(parse_duration("0:05").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn parses_bare_minutes() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45 * 60));
    }

    #[test]
    fn rejects_garbage_durations() {
        assert!(parse_duration("ninety").is_err());
        assert!(parse_duration("1:99").is_err());
    }

    #[test]
    fn template_gets_strftime_substitution() {
        let url = Url::parse("https://cdn.example.com/live/index.m3u8").unwrap();
        let name = output_file_name(&url, Some("show-%Y%m%d"), None, None, &fixed_now());
        assert_eq!(name, "show-20260827.mp4");
    }

    #[test]
    fn default_name_comes_from_url_stem_and_segment_extension() {
        let url = Url::parse("https://cdn.example.com/vod/episode.m3u8").unwrap();
        let name = output_file_name(&url, None, None, Some("seg-001.ts?tok=a"), &fixed_now());
        assert_eq!(name, "episode.ts");
    }

    #[test]
    fn extension_override_wins() {
        let url = Url::parse("https://cdn.example.com/vod/episode.m3u8").unwrap();
        let name = output_file_name(&url, None, Some("mkv"), Some("seg.ts"), &fixed_now());
        assert_eq!(name, "episode.mkv");
    }

    #[test]
    fn template_with_extension_is_kept_verbatim() {
        let url = Url::parse("https://cdn.example.com/vod/episode.m3u8").unwrap();
        let name = output_file_name(&url, Some("capture.ts"), None, None, &fixed_now());
        assert_eq!(name, "capture.ts");
    }
}
