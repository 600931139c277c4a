use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use tracing::{debug, error};

use crate::error::HlsError;

/// Checks if ffmpeg is installed / available in PATH
///
/// # Panics
/// Will panic if the child process cannot be spawned or if there is an error
/// while awaiting its status. See `tokio::process::Command.status()`
pub async fn is_installed() -> bool {
    debug!("Checking for ffmpeg installation");
    tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .stderr(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .await
        .expect("Checking if FFMPEG is installed / available in PATH")
        .success()
}

/// Concat demuxer manifest body: one `file '<path>'` line per input, in the
/// order the segments appear in the playlist.
pub fn manifest_body(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| format!("file '{}'\n", f.display()))
        .collect()
}

/// Splices segment files into `out_file` using ffmpeg's concat demuxer,
/// copying streams without re-encoding.
/// See: <https://trac.ffmpeg.org/wiki/Concatenate#demuxer>
///
/// On success the manifest and the intermediate segment files are removed.
/// On a non-zero ffmpeg exit everything is left in place for diagnosis.
///
/// # Errors
/// `ReassemblyFailed` when ffmpeg exits non-zero; `WriteFailed` when the
/// manifest cannot be written or the process cannot be spawned.
pub async fn concat_segments(
    files: &[PathBuf],
    manifest_path: &Path,
    out_file: &Path,
) -> Result<(), HlsError> {
    tokio::fs::write(manifest_path, manifest_body(files)).await?;

    let child = tokio::process::Command::new("ffmpeg")
        .args([
            "-stats",
            "-y",
            "-loglevel",
            "error",
            "-avoid_negative_ts",
            "make_zero",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ])
        .arg(manifest_path)
        .args(["-c", "copy"])
        .arg(out_file)
        .spawn()?;

    let out = child.wait_with_output().await?;
    if !out.status.success() {
        error!("Segment concatenation is unsuccessful");
        error!("stdout: {}", String::from_utf8_lossy(&out.stdout));
        error!("stderr: {}", String::from_utf8_lossy(&out.stderr));
        return Err(HlsError::ReassemblyFailed { status: out.status });
    }

    tokio::fs::remove_file(manifest_path).await?;
    for file in files {
        tokio::fs::remove_file(file).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_lists_files_in_playlist_order() {
        let files = vec![
            PathBuf::from("/scratch/00000-b.ts"),
            PathBuf::from("/scratch/00001-a.ts"),
            PathBuf::from("/scratch/00002-c.ts"),
        ];
        let body = manifest_body(&files);
        assert_eq!(
            body,
            "file '/scratch/00000-b.ts'\n\
             file '/scratch/00001-a.ts'\n\
             file '/scratch/00002-c.ts'\n"
        );
    }

    #[test]
    fn manifest_has_exactly_one_line_per_input() {
        let files = vec![PathBuf::from("/a.ts"), PathBuf::from("/b.ts")];
        assert_eq!(manifest_body(&files).lines().count(), files.len());
    }
}
