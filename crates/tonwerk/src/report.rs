//! Per-run report document, the artifact the dashboard reads.
//!
//! A report is created at run start, appended to while the run progresses,
//! and written once at run end. Job records are immutable once appended; a
//! rerun of the same logical job happens through the quarantine pipeline
//! and produces its own record there.

use serde::{Deserialize, Serialize};

use crate::validate::AudioCheck;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunReport {
    pub schema_version: u32,
    pub run_id: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub watch_folder: String,
    pub settings_path: String,
    pub rules_path: String,
    pub jobs: Vec<JobRecord>,
    pub repairs: Vec<Repair>,
    pub summary: RunSummary,
    /// Pointer patched in by test scenarios only; the runner itself never
    /// writes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selftest: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "bereit")]
    Bereit,
    #[serde(rename = "uebersprungen")]
    Uebersprungen,
    #[serde(rename = "quarantaene")]
    Quarantaene,
    #[serde(rename = "fertig")]
    Fertig,
}

/// One audio input processed in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub nr: usize,
    pub preset: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tmp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_quarantine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_final: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs_final: Option<CommittedInputs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<AudioCheck>,
}

impl JobRecord {
    pub fn new(nr: usize, preset: &str) -> Self {
        Self {
            nr,
            preset: preset.to_string(),
            status: JobStatus::Bereit,
            audio: None,
            image: None,
            output_tmp: None,
            output_quarantine: None,
            output_final: None,
            inputs_final: None,
            reason: None,
            error: None,
            validation: None,
        }
    }
}

/// Where the consumed inputs ended up in the library. An empty image means
/// the run used the fallback asset, which stays where it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedInputs {
    pub audio: String,
    pub image: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSummary {
    pub fertig: usize,
    pub quarantaene: usize,
    pub gesamt: usize,
}

/// Non-fatal findings a run recovered from without aborting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Repair {
    SkipUnstableImage { file: String },
    MoveFailImage { file: String, error: String },
    MoveFailAudio { file: String, error: String },
    LockCleanupFailed { lock_path: String, error: String },
}
