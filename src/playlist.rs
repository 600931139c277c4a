use std::sync::LazyLock;

use m3u8_rs::{MasterPlaylist, Playlist, VariantStream};
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::HlsError;

/// Upper bound on master -> media (and page -> playlist) hops, so cyclic
/// master playlist references cannot spin forever.
const MAX_HOPS: usize = 5;

static EMBEDDED_PLAYLIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^\s"'<>]+\.m3u8?[^\s"'<>]*"#).unwrap());

/// A fully resolved media playlist: segment URIs in playback order plus the
/// URL they resolve against. This order is load-bearing for reassembly.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub segment_uris: Vec<String>,
    pub base_url: Url,
}

/// Follows a root URL down to a media playlist.
///
/// Master playlists recurse into their highest-bandwidth variant. When
/// `scan_html` is set and the server answers with an HTML page, the body is
/// scanned for an embedded `.m3u`/`.m3u8` URL instead.
///
/// # Errors
/// `PlaylistNotFound`, `InvalidPlaylist`, `NoSelectableVariant` or
/// `TooManyRedirects` depending on where resolution got stuck.
#[instrument(skip(client, scan_html))]
pub async fn resolve(
    client: &reqwest::Client,
    url: Url,
    scan_html: bool,
) -> Result<ResolvedMedia, HlsError> {
    let mut current = url;

    for _ in 0..MAX_HOPS {
        let resp = client.get(current.clone()).send().await?;
        let is_html = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        let body = resp.text().await?;

        if scan_html && is_html {
            let Some(found) = extract_playlist_url(&body) else {
                return Err(HlsError::PlaylistNotFound);
            };
            debug!("Found embedded playlist URL in page: {found}");
            current = current.join(found)?;
            continue;
        }

        match parse_playlist(&body)? {
            Playlist::MasterPlaylist(master) => {
                let variant = select_variant(&master)?;
                info!(
                    "Master playlist: picked variant with bandwidth {} out of {} candidates",
                    variant.bandwidth,
                    master.variants.len()
                );
                current = current.join(&variant.uri)?;
            }
            Playlist::MediaPlaylist(media) => {
                let segment_uris = media.segments.iter().map(|s| s.uri.clone()).collect();
                return Ok(ResolvedMedia {
                    segment_uris,
                    base_url: current,
                });
            }
        }
    }

    Err(HlsError::TooManyRedirects(MAX_HOPS))
}

/// Parses playlist text, retrying once with a synthetic `#EXTM3U` header for
/// servers that serve bare segment lists.
pub fn parse_playlist(text: &str) -> Result<Playlist, HlsError> {
    match m3u8_rs::parse_playlist_res(text.as_bytes()) {
        Ok(playlist) => Ok(playlist),
        Err(_) => {
            let padded = format!("#EXTM3U\n{text}");
            m3u8_rs::parse_playlist_res(padded.as_bytes())
                .map_err(|e| HlsError::InvalidPlaylist(format!("{e:?}")))
        }
    }
}

/// Picks the variant with the strictly maximum bandwidth; ties resolve to the
/// first-listed variant. Variants without a usable bandwidth are skipped.
pub fn select_variant(master: &MasterPlaylist) -> Result<&VariantStream, HlsError> {
    let mut best: Option<&VariantStream> = None;
    for variant in &master.variants {
        if variant.bandwidth == 0 {
            continue;
        }
        if best.is_none_or(|b| variant.bandwidth > b.bandwidth) {
            best = Some(variant);
        }
    }
    best.ok_or(HlsError::NoSelectableVariant)
}

/// Scans an HTML body for the first embedded `.m3u`/`.m3u8` URL.
pub fn extract_playlist_url(body: &str) -> Option<&str> {
    EMBEDDED_PLAYLIST_REGEX.find(body).map(|m| m.as_str())
}
