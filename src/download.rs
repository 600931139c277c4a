use std::{path::PathBuf, sync::Arc};

use indicatif::ProgressBar;
use tokio::{select, task::JoinSet};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::HlsError,
    fetch::{self, SegmentOutcome},
    limiter::HostLimiter,
    playlist::ResolvedMedia,
    session::Session,
};

/// One downloadable chunk of the stream. Immutable once planned; only the
/// associated `SegmentOutcome` changes as the download runs.
#[derive(Debug, Clone)]
pub struct Segment {
    pub url: Url,
    pub dest: PathBuf,
    pub name: String,
}

/// Outcome of one orchestrator run: destination paths in playlist order
/// regardless of per-segment success, plus each segment's terminal state.
#[derive(Debug)]
pub struct DownloadSummary {
    pub files: Vec<PathBuf>,
    pub outcomes: Vec<SegmentOutcome>,
}

impl DownloadSummary {
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }
}

/// Resolves every segment URI against the playlist base and assigns each a
/// destination path.
///
/// With more than one segment, files land in the scratch directory under an
/// index-prefixed name, so playlist order survives on disk and repeated
/// segment names never collide. A single-segment playlist skips the scratch
/// directory entirely: its destination is the final output path.
pub fn plan_segments(media: &ResolvedMedia, session: &Session) -> Result<Vec<Segment>, HlsError> {
    let single = media.segment_uris.len() == 1;

    media
        .segment_uris
        .iter()
        .enumerate()
        .map(|(index, uri)| {
            let url = media.base_url.join(uri)?;
            let name = url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .filter(|last| !last.is_empty())
                .unwrap_or("segment")
                .to_string();
            let dest = if single {
                session.output_path.clone()
            } else {
                session.scratch_dir.join(format!("{index:05}-{name}"))
            };
            Ok(Segment { url, dest, name })
        })
        .collect()
}

/// Fans out one fetch task per segment and waits for all of them.
///
/// Tasks start in playlist order without waiting on each other; concurrency
/// is bounded only by the per-host limiter. One segment's failure never
/// cancels its siblings, so the join always collects every outcome.
pub async fn run(
    client: &reqwest::Client,
    segments: Vec<Segment>,
    session: &Session,
    limiter: Arc<HostLimiter>,
    ct: &CancellationToken,
    progress: ProgressBar,
) -> DownloadSummary {
    let total = segments.len();
    let files: Vec<PathBuf> = segments.iter().map(|s| s.dest.clone()).collect();
    let stop_at = session.stop_at;

    let mut tasks = JoinSet::new();
    for (index, segment) in segments.into_iter().enumerate() {
        let client = client.clone();
        let limiter = limiter.clone();
        let ct = ct.clone();
        let progress = progress.clone();

        tasks.spawn(async move {
            let host = segment.url.host_str().unwrap_or("").to_string();
            let _permit = select! {
                () = ct.cancelled() => {
                    return (index, SegmentOutcome::Failed { reason: "cancelled".to_string() });
                }
                permit = limiter.acquire(&host) => permit,
            };

            let outcome = fetch::fetch_segment(&client, &segment.url, &segment.dest, stop_at).await;
            progress.set_message(segment.name);
            progress.inc(1);
            (index, outcome)
        });
    }

    let mut outcomes = vec![
        SegmentOutcome::Failed {
            reason: "not started".to_string()
        };
        total
    ];
    for (index, outcome) in tasks.join_all().await {
        outcomes[index] = outcome;
    }
    progress.finish_and_clear();

    DownloadSummary { files, outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(output: &str) -> Session {
        Session::new(std::path::Path::new("/tmp/work"), PathBuf::from(output), None)
    }

    fn resolved(uris: &[&str]) -> ResolvedMedia {
        ResolvedMedia {
            segment_uris: uris.iter().map(|s| (*s).to_string()).collect(),
            base_url: Url::parse("https://cdn.example.com/vod/index.m3u8").unwrap(),
        }
    }

    #[test]
    fn plan_preserves_playlist_order() {
        let media = resolved(&["seg-b.ts", "seg-a.ts", "https://other.example.com/seg-c.ts"]);
        let session = session("/out/episode.mp4");
        let plan = plan_segments(&media, &session).unwrap();

        assert_eq!(
            plan.iter().map(|s| s.url.as_str()).collect::<Vec<_>>(),
            [
                "https://cdn.example.com/vod/seg-b.ts",
                "https://cdn.example.com/vod/seg-a.ts",
                "https://other.example.com/seg-c.ts",
            ]
        );
    }

    #[test]
    fn plan_assigns_unique_scratch_paths_for_repeated_names() {
        let media = resolved(&["chunk.ts", "a/chunk.ts", "b/chunk.ts"]);
        let session = session("/out/episode.mp4");
        let plan = plan_segments(&media, &session).unwrap();

        let mut dests: Vec<_> = plan.iter().map(|s| s.dest.clone()).collect();
        dests.sort();
        dests.dedup();
        assert_eq!(dests.len(), 3);
        assert!(plan.iter().all(|s| s.dest.starts_with(&session.scratch_dir)));
    }

    #[test]
    fn single_segment_writes_the_final_output_directly() {
        let media = resolved(&["whole-stream.ts"]);
        let session = session("/out/episode.ts");
        let plan = plan_segments(&media, &session).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].dest, PathBuf::from("/out/episode.ts"));
    }
}
