//! File-name policy: slugs, the batch output-name template, and the staging
//! and library suffixes that mark a file's place in the pipeline.

use std::path::Path;

use chrono::{DateTime, Local};

/// Placeholders: `{audio}` (slugged stem), `{vorlage}` (preset id),
/// `{datum}`, `{uhrzeit}`, `{nummer}` (3-digit sequence), `{sw}`
/// (grayscale marker).
pub const DEFAULT_BATCH_TEMPLATE: &str = "{audio}_{vorlage}_{datum}_{uhrzeit}_{nummer}{sw}";

const SLUG_MAX_LEN: usize = 120;

/// Lowercased, whitespace-collapsed fragment restricted to `[a-z0-9._-]`,
/// safe for any filesystem this tool writes to.
pub fn safe_slug(s: &str) -> String {
    let lowered = s.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut in_whitespace = false;
    for ch in lowered.trim().chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
        } else {
            in_whitespace = false;
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-') {
                out.push(ch);
            }
        }
    }
    out.trim_matches(|c| matches!(c, '.' | '_' | '-'))
        .chars()
        .take(SLUG_MAX_LEN)
        .collect()
}

/// Render the batch naming template into a final `.mp4` name.
pub fn build_output_name(
    template: &str,
    audio_path: &Path,
    preset: &str,
    grayscale: bool,
    nr: usize,
    now: &DateTime<Local>,
) -> String {
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rendered = template
        .replace("{audio}", &safe_slug(&stem))
        .replace("{vorlage}", &safe_slug(preset))
        .replace("{datum}", &now.format("%Y-%m-%d").to_string())
        .replace("{uhrzeit}", &now.format("%H%M%S").to_string())
        .replace("{nummer}", &format!("{nr:03}"))
        .replace("{sw}", if grayscale { "_sw" } else { "" });
    format!("{}.mp4", safe_slug(&rendered))
}

/// Staging name for an input pulled out of the watch folder. The run id in
/// the name ties the file to the run that claimed it.
pub fn staged_name(path: &Path, run_id: &str) -> String {
    format!(
        "{}_in_work_{}{}",
        safe_slug(&stem_of(path)),
        run_id,
        ext_lower(path)
    )
}

/// Library name for a consumed input. The timestamp suffix distinguishes
/// inputs a run actually used from files that were merely staged.
pub fn used_name(path: &Path, used_ts: &str) -> String {
    format!(
        "{}_used_{}{}",
        safe_slug(&stem_of(path)),
        used_ts,
        ext_lower(path)
    )
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn ext_lower(path: &Path) -> String {
    path.extension()
        .map(|s| format!(".{}", s.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}
