//! Locating the generated video in the ComfyUI output directory.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extensions treated as video output.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "avi", "mov", "mkv"];

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("No output video generated. Files in output dir: {listing:?}")]
    NoVideo { listing: Vec<String> },

    #[error("Failed to read output directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Whether `path` has one of [`VIDEO_EXTENSIONS`] (case-insensitive).
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.iter().any(|v| e.eq_ignore_ascii_case(v)))
        .unwrap_or(false)
}

struct Candidate {
    path: PathBuf,
    name: String,
    modified: SystemTime,
}

/// Pick the generated video from `dir`.
///
/// Candidates are tried in order: `<prefix>_*.mp4`, any `*.mp4`, then any
/// file with a video extension. Within the first non-empty group the most
/// recently modified file wins.
pub fn find_output_video(dir: &Path, prefix: &str) -> Result<PathBuf, OutputError> {
    let io_err = |source: std::io::Error| OutputError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let metadata = entry.metadata().map_err(io_err)?;
        if !metadata.is_file() {
            continue;
        }
        files.push(Candidate {
            path: entry.path(),
            name: entry.file_name().to_string_lossy().into_owned(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    let newest = |pred: &dyn Fn(&Candidate) -> bool| {
        files
            .iter()
            .filter(|c| pred(c))
            .max_by_key(|c| c.modified)
            .map(|c| c.path.clone())
    };

    // Video Helper Suite appends `_<counter>` to the prefix.
    let job_prefix = format!("{prefix}_");
    let found = newest(&|c: &Candidate| c.name.starts_with(&job_prefix) && c.name.ends_with(".mp4"))
        .or_else(|| newest(&|c: &Candidate| c.name.ends_with(".mp4")))
        .or_else(|| newest(&|c: &Candidate| is_video(&c.path)));
    if let Some(path) = found {
        return Ok(path);
    }

    let mut listing: Vec<String> = files.into_iter().map(|c| c.name).collect();
    listing.sort();
    tracing::debug!(dir = %dir.display(), ?listing, "No video candidates in output directory");
    Err(OutputError::NoVideo { listing })
}
