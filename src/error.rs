use std::io;

use reqwest::StatusCode;

/// Errors surfaced while resolving playlists, downloading segments and
/// reassembling the final file.
///
/// Resolution errors are fatal to the URL being processed. `FetchFailed` and
/// `WriteFailed` are per-segment and never abort sibling downloads.
#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    #[error("no playlist URL found in the fetched page")]
    PlaylistNotFound,

    #[error("unparseable playlist: {0}")]
    InvalidPlaylist(String),

    #[error("master playlist carries no variant with a usable BANDWIDTH")]
    NoSelectableVariant,

    #[error("playlist resolution did not converge after {0} hops")]
    TooManyRedirects(usize),

    #[error("segment fetch failed with HTTP {status} for {url}")]
    FetchFailed { status: StatusCode, url: String },

    #[error("writing segment to disk failed: {0}")]
    WriteFailed(#[from] io::Error),

    #[error("ffmpeg concatenation exited with {status}")]
    ReassemblyFailed { status: std::process::ExitStatus },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
