//! Quarantine worker: one process, one job, one retry.
//!
//! The desktop shell spawns one worker per job it wants re-tried; a batch
//! action may spawn several. Nothing here assumes it is the only writer of
//! the day's ledger, so every read-modify-write goes through the document
//! store's lock.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};

use crate::activity::log_activity;
use crate::config::{Rules, Settings};
use crate::encode::{self, EncodeRequest};
use crate::fsops;
use crate::ledger::{QuarantineJob, QuarantineLedger, QuarantineStatus};
use crate::naming;
use crate::perf;
use crate::probe;
use crate::store::{self, SaveOptions, StoreError};
use crate::validate::{validate_audio, AudioCheck};

/// Exit codes shared with the GUI: 0 = done or nothing to do, 1 = source
/// missing, 2 = environment or encode failure, 3 = validation failure.
pub const EXIT_DONE: i32 = 0;
pub const EXIT_SOURCE_MISSING: i32 = 1;
pub const EXIT_ENCODE_FAIL: i32 = 2;
pub const EXIT_AUDIO_CHECK_FAIL: i32 = 3;

/// Retry one quarantine job from today's ledger: the given id, or the
/// first waiting job when none is given. Returns the process exit code.
pub async fn run(job_id: Option<&str>, settings_path: &Path, rules_path: &Path) -> Result<i32> {
    let settings = Settings::load(settings_path)?;
    let resolved = settings.validate()?;
    let rules = Rules::load(rules_path);
    let save_opts = SaveOptions::default();
    let paths = &resolved.paths;
    let logs_dir = paths.logs_dir();

    let day = Local::now().format("%Y-%m-%d").to_string();
    let ledger_path = QuarantineLedger::document_path(&paths.quarantine_jobs_dir(), &day);

    // Cheap read-only check so a worker with nothing to do leaves no trace
    // on disk. The authoritative claim below happens under the lock.
    let requested = job_id.map(str::to_string);
    let existing: QuarantineLedger =
        store::load_or(&ledger_path, || QuarantineLedger::new_for_day(&day));
    let candidate_exists = match requested.as_deref() {
        Some(id) => existing.items.iter().any(|item| item.job_id == id),
        None => existing
            .items
            .iter()
            .any(|item| item.status == QuarantineStatus::Bereit),
    };
    if !candidate_exists {
        info!("no quarantine job to work on");
        return Ok(EXIT_DONE);
    }

    // Claim first: status and tries are persisted before any work, so a
    // crash mid-encode leaves visible evidence of the attempt instead of a
    // silently reverted job.
    let mut claimed_id: Option<String> = None;
    let ledger = store::update(
        &ledger_path,
        || QuarantineLedger::new_for_day(&day),
        |ledger: &mut QuarantineLedger| {
            if let Some(job) = ledger.pick_mut(requested.as_deref()) {
                job.status = QuarantineStatus::Laeuft;
                job.tries += 1;
                claimed_id = Some(job.job_id.clone());
            }
            ledger.recompute_status();
        },
        &save_opts,
    )?;

    let Some(job_key) = claimed_id else {
        info!("no quarantine job to work on");
        return Ok(EXIT_DONE);
    };
    let Some(job) = ledger.items.into_iter().find(|j| j.job_id == job_key) else {
        return Ok(EXIT_DONE);
    };
    info!("working quarantine job {} (try {}/{})", job.job_id, job.tries, job.max_tries);

    if !encode::encoder_available() {
        // Not retryable: the environment needs fixing, not the job.
        finalize(&ledger_path, &day, &job_key, &save_opts, |j| {
            j.status = QuarantineStatus::Fest;
            j.summary = "ffmpeg fehlt".to_string();
        })?;
        log_activity(
            &logs_dir,
            "Quarantäne-Worker abgebrochen: ffmpeg fehlt. Aktion: ffmpeg installieren.",
        );
        return Ok(EXIT_ENCODE_FAIL);
    }

    let staging_audio = PathBuf::from(&job.paths.staging_audio);
    if !staging_audio.exists() {
        // Nothing left to re-encode; source loss is terminal.
        finalize(&ledger_path, &day, &job_key, &save_opts, |j| {
            j.status = QuarantineStatus::Fest;
            j.summary = "Quelle fehlt (Audio nicht gefunden)".to_string();
        })?;
        log_activity(
            &logs_dir,
            &format!("Quarantäne-Auftrag {job_key}: Quelle fehlt (Audio nicht gefunden)."),
        );
        return Ok(EXIT_SOURCE_MISSING);
    }

    // A lost image is recoverable: fall back to the preset cover, the same
    // policy the main run applies.
    let staging_image = PathBuf::from(&job.paths.staging_image);
    let image = if !job.paths.staging_image.is_empty() && staging_image.exists() {
        staging_image
    } else {
        rules.pairing.fallback_image.clone()
    };

    let exports_day = paths.exports_day(&day);
    let quarantine_day = paths.quarantine_day(&day);
    for dir in [&exports_day, &quarantine_day, &paths.temp_renders()] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    }

    let out_stem = Path::new(&job.output_file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let out_base = if out_stem.is_empty() {
        format!("rework_{}", job.job_id)
    } else {
        out_stem
    };
    let out_name = format!("{}.mp4", naming::safe_slug(&out_base));
    let out_tmp = paths.temp_renders().join(&out_name);
    let out_final = exports_day.join(&out_name);

    let fast = encode::fast_mode();
    let (width, height, fps) = encode::preset_dimensions(&job.preset, fast);
    let request = EncodeRequest {
        image,
        audio: staging_audio.clone(),
        output: out_tmp.clone(),
        width,
        height,
        fps,
        audio_bitrate_kbps: resolved.audio.target_bitrate_kbps,
        audio_samplerate_hz: resolved.audio.target_samplerate_hz,
        threads: perf::encoder_threads(&resolved.performance),
    };

    if let Err(err) = encode::run_encode(&request).await {
        warn!("quarantine re-encode failed for {job_key}: {err:#}");
        let parked = park_failed_output(&out_tmp, &quarantine_day);
        finalize(&ledger_path, &day, &job_key, &save_opts, |j| {
            apply_attempt_outcome(j, false);
            j.summary = "Neu machen fehlgeschlagen".to_string();
            j.error = Some(format!("{err:#}"));
            repoint_output(j, parked.as_deref(), &quarantine_day);
        })?;
        log_activity(
            &logs_dir,
            &format!("Quarantäne-Auftrag {job_key}: Neu machen fehlgeschlagen."),
        );
        return Ok(EXIT_ENCODE_FAIL);
    }

    let check = match probe::probe_file(&out_tmp).await {
        Ok(data) => {
            let (bitrate, samplerate) = data.audio_summary();
            validate_audio(
                bitrate,
                samplerate,
                resolved.audio.min_bitrate_kbps,
                resolved.audio.target_samplerate_hz,
            )
        }
        Err(err) => AudioCheck::failure(format!("{err:#}")),
    };

    if !check.ok {
        warn!(
            "audio check failed for {job_key} (bitrate {:?} kbps, samplerate {:?} Hz)",
            check.audio_bitrate_kbps, check.audio_samplerate_hz
        );
        let parked = park_failed_output(&out_tmp, &quarantine_day);
        finalize(&ledger_path, &day, &job_key, &save_opts, |j| {
            apply_attempt_outcome(j, false);
            j.summary = "Tonprüfung fehlgeschlagen".to_string();
            j.validation = check;
            repoint_output(j, parked.as_deref(), &quarantine_day);
        })?;
        log_activity(
            &logs_dir,
            &format!("Quarantäne-Auftrag {job_key}: Tonprüfung fehlgeschlagen."),
        );
        return Ok(EXIT_AUDIO_CHECK_FAIL);
    }

    fsops::move_file(&out_tmp, &out_final)
        .with_context(|| format!("failed to commit output: {}", out_final.display()))?;
    finalize(&ledger_path, &day, &job_key, &save_opts, |j| {
        apply_attempt_outcome(j, true);
        j.validation = check;
        j.output_final = Some(out_final.display().to_string());
    })?;
    info!("quarantine job {job_key} done: {}", out_final.display());
    log_activity(&logs_dir, &format!("Quarantäne-Auftrag {job_key} erledigt."));
    Ok(EXIT_DONE)
}

/// Outcome of one attempt. Retries stay `bereit` until the budget is
/// exhausted; exhausted jobs become `fest` and wait for a human. Success is
/// terminal.
pub fn apply_attempt_outcome(job: &mut QuarantineJob, success: bool) {
    if success {
        job.status = QuarantineStatus::Erledigt;
    } else if job.tries < job.max_tries {
        job.status = QuarantineStatus::Bereit;
    } else {
        job.status = QuarantineStatus::Fest;
    }
}

/// Keep the latest failed artifact visible: move it into quarantine storage
/// so the UI can always show what the last attempt produced.
fn park_failed_output(out_tmp: &Path, quarantine_day: &Path) -> Option<PathBuf> {
    if !out_tmp.exists() {
        return None;
    }
    let stem = out_tmp
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let q_out = quarantine_day.join(format!("{stem}_quarantaene.mp4"));
    match fsops::move_file(out_tmp, &q_out) {
        Ok(()) => Some(q_out),
        Err(err) => {
            warn!("failed to park output in quarantine: {err}");
            None
        }
    }
}

fn repoint_output(job: &mut QuarantineJob, parked: Option<&Path>, quarantine_day: &Path) {
    if let Some(parked) = parked {
        if let Some(name) = parked.file_name() {
            job.output_file = name.to_string_lossy().into_owned();
        }
        job.paths.quarantine_dir = quarantine_day.display().to_string();
    }
}

/// Apply a final state to the claimed job and re-aggregate, all under the
/// ledger lock.
fn finalize(
    ledger_path: &Path,
    day: &str,
    job_id: &str,
    save_opts: &SaveOptions,
    apply: impl FnOnce(&mut QuarantineJob),
) -> Result<(), StoreError> {
    store::update(
        ledger_path,
        || QuarantineLedger::new_for_day(day),
        |ledger: &mut QuarantineLedger| {
            if let Some(job) = ledger.find_mut(job_id) {
                apply(job);
            }
            ledger.recompute_status();
        },
        save_opts,
    )
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{JobPaths, DEFAULT_MAX_TRIES};

    fn claimed_job(tries: u32) -> QuarantineJob {
        QuarantineJob {
            job_id: "q_20260807_010203_0001".to_string(),
            source_run_id: "20260807_010203".to_string(),
            status: QuarantineStatus::Laeuft,
            label: "quarantaene".to_string(),
            summary: "audio_check_fail".to_string(),
            recommended_action: "neu_machen_ton_safe".to_string(),
            tries,
            max_tries: DEFAULT_MAX_TRIES,
            preset: "youtube_hd_ton_safe".to_string(),
            output_file: "track_quarantaene.mp4".to_string(),
            output_final: None,
            error: None,
            paths: JobPaths::default(),
            validation: AudioCheck::default(),
        }
    }

    #[test]
    fn failures_below_the_budget_return_to_ready() {
        let mut job = claimed_job(1);
        apply_attempt_outcome(&mut job, false);
        assert_eq!(job.status, QuarantineStatus::Bereit);

        let mut job = claimed_job(2);
        apply_attempt_outcome(&mut job, false);
        assert_eq!(job.status, QuarantineStatus::Bereit);
    }

    #[test]
    fn exhausted_budget_becomes_a_hard_case() {
        let mut job = claimed_job(3);
        apply_attempt_outcome(&mut job, false);
        assert_eq!(job.status, QuarantineStatus::Fest);
        assert_eq!(job.tries, 3);
    }

    #[test]
    fn success_is_terminal_even_on_the_last_try() {
        let mut job = claimed_job(3);
        apply_attempt_outcome(&mut job, true);
        assert_eq!(job.status, QuarantineStatus::Erledigt);
    }

    #[test]
    fn three_straight_failures_walk_the_documented_path() {
        // One worker invocation per attempt: claim increments tries, the
        // failure outcome decides the next status.
        let mut job = claimed_job(0);
        for attempt in 1..=3u32 {
            job.status = QuarantineStatus::Laeuft;
            job.tries += 1;
            apply_attempt_outcome(&mut job, false);
            if attempt < 3 {
                assert_eq!(job.status, QuarantineStatus::Bereit);
            }
        }
        assert_eq!(job.status, QuarantineStatus::Fest);
        assert_eq!(job.tries, 3);
    }

    #[test]
    fn fail_twice_then_succeed_ends_done_with_three_tries() {
        let mut job = claimed_job(0);
        for _ in 0..2 {
            job.status = QuarantineStatus::Laeuft;
            job.tries += 1;
            apply_attempt_outcome(&mut job, false);
            assert_eq!(job.status, QuarantineStatus::Bereit);
        }
        job.status = QuarantineStatus::Laeuft;
        job.tries += 1;
        apply_attempt_outcome(&mut job, true);
        assert_eq!(job.status, QuarantineStatus::Erledigt);
        assert_eq!(job.tries, 3);
    }

    #[test]
    fn repoint_updates_the_artifact_pointer_only_when_parked() {
        let mut job = claimed_job(1);
        repoint_output(&mut job, None, Path::new("/data/quarantine/2026-08-07"));
        assert_eq!(job.output_file, "track_quarantaene.mp4");

        repoint_output(
            &mut job,
            Some(Path::new("/data/quarantine/2026-08-07/retry_quarantaene.mp4")),
            Path::new("/data/quarantine/2026-08-07"),
        );
        assert_eq!(job.output_file, "retry_quarantaene.mp4");
        assert_eq!(job.paths.quarantine_dir, "/data/quarantine/2026-08-07");
    }
}
