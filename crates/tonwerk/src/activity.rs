//! Write-only audit trail.
//!
//! One `{at, msg}` line per significant action, in the language the user of
//! the desktop shell reads. The core never reads this file back.

use std::io::Write;
use std::path::Path;

use chrono::Utc;
use log::warn;
use serde::Serialize;

pub const ACTIVITY_LOG_NAME: &str = "activity_log.jsonl";

#[derive(Serialize)]
struct ActivityEntry<'a> {
    at: String,
    msg: &'a str,
}

/// Append one line to the activity log. Audit logging must never take the
/// pipeline down, so failures degrade to a process-log warning.
pub fn log_activity(logs_dir: &Path, msg: &str) {
    if let Err(err) = try_append(logs_dir, msg) {
        warn!("failed to append activity log entry: {err:#}");
    }
}

fn try_append(logs_dir: &Path, msg: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(logs_dir)?;
    let entry = ActivityEntry {
        at: timestamp(),
        msg,
    };
    let mut line = serde_json::to_string(&entry)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(ACTIVITY_LOG_NAME))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// UTC timestamp in the `2026-08-07T01:02:03Z` form shared by every
/// document this tool writes.
pub fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
