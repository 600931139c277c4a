use std::{fmt::Display, path::Path, pin::pin};

use tokio::{
    fs::File,
    io::AsyncWriteExt,
    time::Instant,
};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::HlsError;

/// Terminal state of one segment download.
///
/// `TruncatedByTimeout` is a normal termination in recording mode, not a
/// failure: the cutoff is cooperative and acts at chunk boundaries only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Succeeded { bytes: u64 },
    TruncatedByTimeout { bytes: u64 },
    Failed { reason: String },
}

impl SegmentOutcome {
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Downloads one segment, streaming the body straight to `dest`.
///
/// HTTP error statuses and local write errors are folded into
/// `SegmentOutcome::Failed` so one bad segment never aborts its siblings.
#[instrument(skip(client, stop_at))]
pub async fn fetch_segment(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
    stop_at: Option<Instant>,
) -> SegmentOutcome {
    match try_fetch(client, url, dest, stop_at).await {
        Ok(outcome) => {
            debug!("Done downloading {url}: {outcome:?}");
            outcome
        }
        Err(e) => {
            warn!("Segment {url} failed: {e}");
            SegmentOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

async fn try_fetch(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
    stop_at: Option<Instant>,
) -> Result<SegmentOutcome, HlsError> {
    let resp = client.get(url.clone()).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(HlsError::FetchFailed {
            status,
            url: url.to_string(),
        });
    }

    let content_length = resp.content_length();
    let file = File::create(dest).await?;
    write_stream(resp.bytes_stream(), file, content_length, stop_at).await
}

/// Core chunk loop: writes body chunks in arrival order, stopping early at
/// the recording cutoff or once the declared content length is reached.
async fn write_stream<S, B, E>(
    chunks: S,
    mut file: File,
    content_length: Option<u64>,
    stop_at: Option<Instant>,
) -> Result<SegmentOutcome, HlsError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut chunks = pin!(chunks);
    let mut written: u64 = 0;

    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                file.flush().await?;
                return Ok(SegmentOutcome::Failed {
                    reason: format!("body stream error after {written} bytes: {e}"),
                });
            }
        };

        file.write_all(chunk.as_ref()).await?;
        written += chunk.as_ref().len() as u64;

        if stop_at.is_some_and(|t| Instant::now() >= t) {
            file.flush().await?;
            return Ok(SegmentOutcome::TruncatedByTimeout { bytes: written });
        }
        if content_length.is_some_and(|len| written >= len) {
            break;
        }
    }

    file.flush().await?;
    Ok(SegmentOutcome::Succeeded { bytes: written })
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    fn chunk_stream(
        chunks: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<&'static [u8], Infallible>> {
        tokio_stream::iter(chunks.into_iter().map(Ok))
    }

    async fn dest_file(dir: &tempfile::TempDir) -> (std::path::PathBuf, File) {
        let path = dir.path().join("segment.ts");
        let file = File::create(&path).await.unwrap();
        (path, file)
    }

    #[tokio::test]
    async fn succeeds_at_declared_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = dest_file(&dir).await;

        let stream = chunk_stream(vec![b"ab", b"cd", b"ef"]);
        let outcome = write_stream(stream, file, Some(4), None).await.unwrap();

        assert_eq!(outcome, SegmentOutcome::Succeeded { bytes: 4 });
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn succeeds_at_natural_end_without_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = dest_file(&dir).await;

        let stream = chunk_stream(vec![b"hello ", b"world"]);
        let outcome = write_stream(stream, file, None, None).await.unwrap();

        assert_eq!(outcome, SegmentOutcome::Succeeded { bytes: 11 });
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn expired_cutoff_truncates_at_first_chunk_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = dest_file(&dir).await;

        let stream = chunk_stream(vec![b"first", b"never-written"]);
        let stop_at = Some(Instant::now());
        let outcome = write_stream(stream, file, None, stop_at).await.unwrap();

        assert_eq!(outcome, SegmentOutcome::TruncatedByTimeout { bytes: 5 });
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn body_stream_error_is_a_per_segment_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = dest_file(&dir).await;

        let chunks: Vec<Result<&[u8], &str>> = vec![Ok(b"partial"), Err("connection reset")];
        let outcome = write_stream(tokio_stream::iter(chunks), file, None, None)
            .await
            .unwrap();

        assert!(!outcome.is_ok());
        // Chunks received before the error stay on disk, in order.
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"partial");
    }
}
