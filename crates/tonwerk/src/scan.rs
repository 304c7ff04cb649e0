//! Watch-folder scan and the download-stability guard.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use log::{debug, warn};

/// Files in the watch folder, split by configured extension sets and
/// ordered oldest-first so earlier downloads are processed first across
/// runs.
#[derive(Debug, Default)]
pub struct WatchScan {
    pub audios: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
}

/// Non-recursive scan. Extension matching is case-insensitive; anything
/// outside the configured sets is ignored.
pub fn scan_watch_folder(
    watch: &Path,
    audio_exts: &HashSet<String>,
    image_exts: &HashSet<String>,
) -> Result<WatchScan> {
    let mut audios: Vec<(SystemTime, PathBuf)> = Vec::new();
    let mut images: Vec<(SystemTime, PathBuf)> = Vec::new();

    let entries = std::fs::read_dir(watch)
        .with_context(|| format!("failed to read watch folder: {}", watch.display()))?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("error reading watch folder entry: {err}");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| format!(".{}", s.to_lowercase()))
        else {
            continue;
        };
        let bucket = if audio_exts.contains(&ext) {
            &mut audios
        } else if image_exts.contains(&ext) {
            &mut images
        } else {
            continue;
        };
        let mtime = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        bucket.push((mtime, path));
    }

    audios.sort();
    images.sort();
    Ok(WatchScan {
        audios: audios.into_iter().map(|(_, path)| path).collect(),
        images: images.into_iter().map(|(_, path)| path).collect(),
    })
}

/// Stat-sleep-stat guard against files still being downloaded. A file is
/// stable when its size is unchanged across the interval and non-zero; any
/// stat error counts as unstable so the file is retried on the next run.
pub async fn stable_file(path: &Path, interval: Duration) -> bool {
    let size_before = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            debug!("stability check failed to stat {}: {err}", path.display());
            return false;
        }
    };
    tokio::time::sleep(interval).await;
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() == size_before && meta.len() > 0,
        Err(err) => {
            debug!("stability check failed to re-stat {}: {err}", path.display());
            false
        }
    }
}
