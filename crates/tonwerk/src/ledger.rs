//! Per-day quarantine ledger.
//!
//! One document per calendar day holds every quarantined job, the derived
//! summary counters, and the aggregate list status. The counters and the
//! list status are pure functions of the items: every mutation recomputes
//! them before the document is persisted, so the ledger can never disagree
//! with its own item list.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::activity;
use crate::validate::AudioCheck;

pub const LEDGER_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_MAX_TRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuarantineStatus {
    #[serde(rename = "bereit")]
    Bereit,
    #[serde(rename = "laeuft")]
    Laeuft,
    #[serde(rename = "erledigt")]
    Erledigt,
    #[serde(rename = "fest")]
    Fest,
    #[serde(rename = "zurueckgestellt")]
    Zurueckgestellt,
}

impl QuarantineStatus {
    /// States that keep a day list open: waiting, running, or stuck on a
    /// human decision.
    pub fn keeps_list_open(self) -> bool {
        matches!(self, Self::Bereit | Self::Laeuft | Self::Fest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListStatus {
    #[serde(rename = "offen")]
    Offen,
    #[serde(rename = "abgehakt")]
    Abgehakt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSummary {
    pub total: usize,
    pub done: usize,
    pub postponed: usize,
    pub hard_cases: usize,
    pub open: usize,
}

/// Where the job's artifacts live. `staging_image` may be empty, meaning
/// "render with the fallback image".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPaths {
    pub quarantine_dir: String,
    pub staging_audio: String,
    pub staging_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineJob {
    pub job_id: String,
    pub source_run_id: String,
    pub status: QuarantineStatus,
    pub label: String,
    pub summary: String,
    pub recommended_action: String,
    pub tries: u32,
    pub max_tries: u32,
    pub preset: String,
    pub output_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_final: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub paths: JobPaths,
    pub validation: AudioCheck,
}

/// Everything the run loop knows about a failed item at quarantine time.
#[derive(Debug)]
pub struct NewQuarantineJob<'a> {
    pub run_id: &'a str,
    pub nr: usize,
    pub preset: &'a str,
    pub output_quarantine: &'a Path,
    pub staging_audio: &'a Path,
    /// `None` when the run used the fallback image.
    pub staging_image: Option<&'a Path>,
    pub reason: &'a str,
    pub validation: AudioCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineLedger {
    pub schema_version: u32,
    pub date: String,
    pub title: String,
    pub created_at: String,
    pub list_status: ListStatus,
    pub closed_at: Option<String>,
    pub summary: LedgerSummary,
    pub items: Vec<QuarantineJob>,
}

impl QuarantineLedger {
    pub fn new_for_day(day: &str) -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            date: day.to_string(),
            title: format!("Quarantäne-Aufträge – {day}"),
            created_at: activity::timestamp(),
            list_status: ListStatus::Offen,
            closed_at: None,
            summary: LedgerSummary::default(),
            items: Vec::new(),
        }
    }

    pub fn document_path(quarantine_jobs_dir: &Path, day: &str) -> PathBuf {
        quarantine_jobs_dir.join(format!("quarantine_jobs_{day}.json"))
    }

    /// Recompute the derived counters and the aggregate list status from
    /// the items. `closed_at` is set once when the list clears and reset
    /// when new open work appears.
    pub fn recompute_status(&mut self) {
        let mut summary = LedgerSummary {
            total: self.items.len(),
            ..LedgerSummary::default()
        };
        for item in &self.items {
            match item.status {
                QuarantineStatus::Erledigt => summary.done += 1,
                QuarantineStatus::Zurueckgestellt => summary.postponed += 1,
                QuarantineStatus::Fest => summary.hard_cases += 1,
                QuarantineStatus::Bereit | QuarantineStatus::Laeuft => summary.open += 1,
            }
        }
        let cleared = summary.hard_cases == 0 && summary.open == 0;
        self.summary = summary;
        if cleared {
            self.list_status = ListStatus::Abgehakt;
            if self.closed_at.is_none() {
                self.closed_at = Some(activity::timestamp());
            }
        } else {
            self.list_status = ListStatus::Offen;
            self.closed_at = None;
        }
    }

    /// Append a job for a failed item and bring the aggregate up to date.
    pub fn append(&mut self, new: NewQuarantineJob<'_>) {
        let job = QuarantineJob {
            job_id: format!("q_{}_{:04}", new.run_id, new.nr),
            source_run_id: new.run_id.to_string(),
            status: QuarantineStatus::Bereit,
            label: "quarantaene".to_string(),
            summary: new.reason.to_string(),
            recommended_action: "neu_machen_ton_safe".to_string(),
            tries: 0,
            max_tries: DEFAULT_MAX_TRIES,
            preset: new.preset.to_string(),
            output_file: new
                .output_quarantine
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            output_final: None,
            error: None,
            paths: JobPaths {
                quarantine_dir: new
                    .output_quarantine
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                staging_audio: new.staging_audio.display().to_string(),
                staging_image: new
                    .staging_image
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            },
            validation: new.validation,
        };
        self.items.push(job);
        self.recompute_status();
    }

    pub fn find_mut(&mut self, job_id: &str) -> Option<&mut QuarantineJob> {
        self.items.iter_mut().find(|item| item.job_id == job_id)
    }

    pub fn first_ready_mut(&mut self) -> Option<&mut QuarantineJob> {
        self.items
            .iter_mut()
            .find(|item| item.status == QuarantineStatus::Bereit)
    }

    /// Selection used by the worker: exact id when given (an id that no
    /// longer exists is not an error), otherwise the first waiting entry in
    /// document order.
    pub fn pick_mut(&mut self, job_id: Option<&str>) -> Option<&mut QuarantineJob> {
        match job_id {
            Some(id) => self.find_mut(id),
            None => self.first_ready_mut(),
        }
    }

    /// Direct status edit (postpone, mark done). Returns whether anything
    /// changed; unknown ids are reported as unchanged rather than failing.
    pub fn set_status(&mut self, job_id: &str, status: QuarantineStatus) -> bool {
        let mut changed = false;
        for item in &mut self.items {
            if item.job_id == job_id {
                item.status = status;
                changed = true;
            }
        }
        if changed {
            self.recompute_status();
        }
        changed
    }
}
