//! The nightly automation run.
//!
//! One invocation scans the watch folder, pairs audio with images, renders
//! each pair through the external encoder, validates the result, and either
//! commits it to the exports tree or routes it into quarantine. The whole
//! run is guarded by a single-run lock file; per-item failures never abort
//! the batch.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Local;
use log::{error, info, warn};

use crate::activity::{self, log_activity};
use crate::config::{ResolvedSettings, Rules, Settings};
use crate::encode::{self, EncodeRequest};
use crate::error::PreflightError;
use crate::fsops;
use crate::ledger::{NewQuarantineJob, QuarantineLedger};
use crate::naming;
use crate::perf;
use crate::probe;
use crate::report::{
    CommittedInputs, JobRecord, JobStatus, Repair, RunReport, RunSummary, REPORT_SCHEMA_VERSION,
};
use crate::scan::{self, stable_file};
use crate::store::{self, SaveOptions, StoreError};
use crate::validate::{validate_audio, AudioCheck};

/// A run either produces a report, yields to an already-running instance,
/// or finds automation switched off. The latter two are silent no-ops.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(PathBuf),
    AlreadyRunning,
    Disabled,
}

/// Automation locks older than this are leftovers of a crashed run and are
/// removed. Generous enough for a slow nightly batch; the scheduler fires
/// once a day.
const AUTOMATION_LOCK_STALE: Duration = Duration::from_secs(6 * 60 * 60);

/// Full batch run. Precondition failures surface as [`PreflightError`]
/// inside the error chain so callers can map them to exit codes.
pub async fn run(settings_path: &Path, rules_path: &Path) -> Result<RunOutcome> {
    let settings = match Settings::load(settings_path) {
        Ok(settings) => settings,
        Err(err) => {
            error!("cannot start automation: {err:#}");
            return Err(PreflightError::SettingsUnreadable(format!("{err:#}")).into());
        }
    };
    let resolved = match settings.validate() {
        Ok(resolved) => resolved,
        Err(err) => {
            error!("cannot start automation: {err}");
            return Err(err.into());
        }
    };
    let rules = Rules::load(rules_path);
    if !rules.enabled {
        info!("automation disabled by rules, nothing to do");
        return Ok(RunOutcome::Disabled);
    }

    let logs_dir = resolved.paths.logs_dir();
    resolved.paths.ensure_structure()?;

    if !encode::encoder_available() {
        log_activity(
            &logs_dir,
            "Automatik abgebrochen: ffmpeg/ffprobe fehlt (Setup nötig).",
        );
        return Err(PreflightError::EncoderMissing.into());
    }

    let watch = resolved.paths.watch_folder.clone();
    if !watch.is_dir() {
        log_activity(
            &logs_dir,
            &format!("Automatik abgebrochen: Watchfolder fehlt: {}", watch.display()),
        );
        return Err(PreflightError::WatchFolderMissing(watch).into());
    }

    let now = Local::now();
    let day = now.format("%Y-%m-%d").to_string();
    let run_id = now.format("%Y%m%d_%H%M%S").to_string();

    let lock_path = resolved.paths.automation_lock();
    match acquire_run_lock(&lock_path, &run_id)? {
        RunLock::Acquired => {}
        RunLock::Busy => {
            log_activity(&logs_dir, "Lock vorhanden: Automatik läuft schon. Abbruch.");
            info!("automation lock held by another run, nothing to do");
            return Ok(RunOutcome::AlreadyRunning);
        }
    }

    let result = execute_run(
        &resolved,
        &rules,
        settings_path,
        rules_path,
        &day,
        &run_id,
        &logs_dir,
    )
    .await;

    // The lock must go away however the run ended; a failed removal is
    // recorded in the report instead of lost.
    release_run_lock(
        &lock_path,
        &logs_dir,
        result.as_ref().ok().map(|p| p.as_path()),
    );

    result.map(RunOutcome::Completed)
}

enum RunLock {
    Acquired,
    Busy,
}

fn acquire_run_lock(lock_path: &Path, run_id: &str) -> Result<RunLock> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create staging directory: {}", parent.display()))?;
    }
    for _ in 0..2 {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                file.write_all(run_id.as_bytes()).with_context(|| {
                    format!("failed to write automation lock: {}", lock_path.display())
                })?;
                return Ok(RunLock::Acquired);
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let age = std::fs::metadata(lock_path)
                    .and_then(|meta| meta.modified())
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok());
                match age {
                    Some(age) if age > AUTOMATION_LOCK_STALE => {
                        warn!(
                            "removing stale automation lock {} (age {}s)",
                            lock_path.display(),
                            age.as_secs()
                        );
                        let _ = std::fs::remove_file(lock_path);
                        continue;
                    }
                    _ => return Ok(RunLock::Busy),
                }
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to create automation lock: {}", lock_path.display())
                })
            }
        }
    }
    Ok(RunLock::Busy)
}

fn release_run_lock(lock_path: &Path, logs_dir: &Path, report_path: Option<&Path>) {
    match std::fs::remove_file(lock_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            error!(
                "failed to remove automation lock {}: {err}",
                lock_path.display()
            );
            log_activity(
                logs_dir,
                &format!(
                    "Automatik: Lock konnte nicht entfernt werden ({}). Bitte prüfen.",
                    lock_path.display()
                ),
            );
            if let Some(report_path) = report_path {
                let repair = Repair::LockCleanupFailed {
                    lock_path: lock_path.display().to_string(),
                    error: err.to_string(),
                };
                let patched = store::update(
                    report_path,
                    RunReport::default,
                    |report: &mut RunReport| report.repairs.push(repair),
                    &SaveOptions::default(),
                );
                if let Err(store_err) = patched {
                    error!(
                        "failed to record lock cleanup repair in {}: {store_err}",
                        report_path.display()
                    );
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_run(
    settings: &ResolvedSettings,
    rules: &Rules,
    settings_path: &Path,
    rules_path: &Path,
    day: &str,
    run_id: &str,
    logs_dir: &Path,
) -> Result<PathBuf> {
    let save_opts = SaveOptions::default();
    let paths = &settings.paths;

    let mut report = RunReport {
        schema_version: REPORT_SCHEMA_VERSION,
        run_id: run_id.to_string(),
        started_at: activity::timestamp(),
        finished_at: None,
        watch_folder: paths.watch_folder.display().to_string(),
        settings_path: settings_path.display().to_string(),
        rules_path: rules_path.display().to_string(),
        jobs: Vec::new(),
        repairs: Vec::new(),
        summary: RunSummary::default(),
        selftest: None,
    };

    let watch_scan = scan::scan_watch_folder(
        &paths.watch_folder,
        &rules.audio_extension_set(),
        &rules.image_extension_set(),
    )?;
    let stability = Duration::from_secs(rules.scan.stability_check_secs);

    let staging_audio_dir = paths.staging_day(day).join("audio");
    let staging_images_dir = paths.staging_day(day).join("images");
    let exports_day = paths.exports_day(day);
    let quarantine_day = paths.quarantine_day(day);
    let library_audio_day = paths.library_audio_day(day);
    let library_images_day = paths.library_images_day(day);
    let temp_renders = paths.temp_renders();
    for dir in [
        &staging_audio_dir,
        &staging_images_dir,
        &exports_day,
        &quarantine_day,
        &library_audio_day,
        &library_images_day,
        &temp_renders,
    ] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    }

    let ledger_path = QuarantineLedger::document_path(&paths.quarantine_jobs_dir(), day);
    if !ledger_path.exists() {
        store::save(&ledger_path, &QuarantineLedger::new_for_day(day), &save_opts)?;
    }

    let fallback_image = rules.pairing.fallback_image.clone();
    let preset_id = rules.presets.default_preset_id.clone();
    let fast = encode::fast_mode();
    let (width, height, fps) = encode::preset_dimensions(&preset_id, fast);
    let threads = perf::encoder_threads(&settings.performance);

    info!(
        "run {run_id}: {} audio file(s), {} image(s) in {}",
        watch_scan.audios.len(),
        watch_scan.images.len(),
        paths.watch_folder.display()
    );

    // Stage images first so positional pairing sees a settled list.
    let mut staged_images: Vec<PathBuf> = Vec::new();
    for image in &watch_scan.images {
        if !stable_file(image, stability).await {
            info!("skipping unstable image: {}", image.display());
            report.repairs.push(Repair::SkipUnstableImage {
                file: image.display().to_string(),
            });
            continue;
        }
        let dst = staging_images_dir.join(naming::staged_name(image, run_id));
        match fsops::move_file(image, &dst) {
            Ok(()) => staged_images.push(dst),
            Err(err) => {
                warn!("failed to stage image {}: {err}", image.display());
                report.repairs.push(Repair::MoveFailImage {
                    file: image.display().to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    let mut ok_count = 0usize;
    let mut quarantine_count = 0usize;

    for (idx, audio) in watch_scan.audios.iter().enumerate() {
        let nr = idx + 1;
        let mut job = JobRecord::new(nr, &preset_id);

        if !stable_file(audio, stability).await {
            info!("skipping unstable audio: {}", audio.display());
            job.status = JobStatus::Uebersprungen;
            job.reason = Some("download_nicht_stabil".to_string());
            job.audio = Some(audio.display().to_string());
            report.jobs.push(job);
            continue;
        }

        let staged_audio = staging_audio_dir.join(naming::staged_name(audio, run_id));
        if let Err(err) = fsops::move_file(audio, &staged_audio) {
            warn!("failed to stage audio {}: {err}", audio.display());
            quarantine_count += 1;
            job.status = JobStatus::Quarantaene;
            job.reason = Some("move_fail_audio".to_string());
            job.audio = Some(audio.display().to_string());
            job.error = Some(err.to_string());
            report.jobs.push(job);
            continue;
        }

        // Nth audio pairs with the Nth staged image; the excess pairs with
        // the fallback asset.
        let (image, image_is_fallback) = match staged_images.get(idx) {
            Some(staged) => (staged.clone(), false),
            None => (fallback_image.clone(), true),
        };

        let out_name = naming::build_output_name(
            &settings.naming.template_batch,
            &staged_audio,
            &preset_id,
            false,
            nr,
            &Local::now(),
        );
        let out_tmp = temp_renders.join(&out_name);
        let out_final = exports_day.join(&out_name);

        job.audio = Some(staged_audio.display().to_string());
        job.image = Some(image.display().to_string());
        job.output_tmp = Some(out_tmp.display().to_string());

        let request = EncodeRequest {
            image: image.clone(),
            audio: staged_audio.clone(),
            output: out_tmp.clone(),
            width,
            height,
            fps,
            audio_bitrate_kbps: settings.audio.target_bitrate_kbps,
            audio_samplerate_hz: settings.audio.target_samplerate_hz,
            threads,
        };

        if let Err(err) = encode::run_encode(&request).await {
            warn!("encode failed for {}: {err:#}", staged_audio.display());
            quarantine_count += 1;
            job.status = JobStatus::Quarantaene;
            job.reason = Some("encode_fail".to_string());
            job.error = Some(format!("{err:#}"));
            // Zero-byte marker so the quarantine record always has a
            // referenceable output file, even on total encode failure.
            let marker = quarantine_day.join(format!("{}_quarantaene.txt", stem_of(&out_name)));
            if let Err(marker_err) = std::fs::write(&marker, b"") {
                warn!("failed to write quarantine marker {}: {marker_err}", marker.display());
            }
            persist_quarantine_job(
                &ledger_path,
                day,
                NewQuarantineJob {
                    run_id,
                    nr,
                    preset: &preset_id,
                    output_quarantine: &marker,
                    staging_audio: &staged_audio,
                    staging_image: (!image_is_fallback).then_some(image.as_path()),
                    reason: "encode_fail",
                    validation: AudioCheck::default(),
                },
                logs_dir,
                &save_opts,
            );
            report.jobs.push(job);
            continue;
        }

        let check = match probe::probe_file(&out_tmp).await {
            Ok(data) => {
                let (bitrate, samplerate) = data.audio_summary();
                validate_audio(
                    bitrate,
                    samplerate,
                    settings.audio.min_bitrate_kbps,
                    settings.audio.target_samplerate_hz,
                )
            }
            Err(err) => AudioCheck::failure(format!("{err:#}")),
        };
        job.validation = Some(check.clone());

        if !check.ok {
            info!(
                "audio check failed for {} (bitrate {:?} kbps, samplerate {:?} Hz)",
                out_tmp.display(),
                check.audio_bitrate_kbps,
                check.audio_samplerate_hz
            );
            quarantine_count += 1;
            let q_out = quarantine_day.join(format!("{}_quarantaene.mp4", stem_of(&out_name)));
            if let Err(err) = fsops::move_file(&out_tmp, &q_out) {
                warn!("failed to move failed output into quarantine: {err}");
            }
            job.status = JobStatus::Quarantaene;
            job.reason = Some("audio_check_fail".to_string());
            job.output_quarantine = Some(q_out.display().to_string());
            persist_quarantine_job(
                &ledger_path,
                day,
                NewQuarantineJob {
                    run_id,
                    nr,
                    preset: &preset_id,
                    output_quarantine: &q_out,
                    staging_audio: &staged_audio,
                    staging_image: (!image_is_fallback).then_some(image.as_path()),
                    reason: "audio_check_fail",
                    validation: check,
                },
                logs_dir,
                &save_opts,
            );
            report.jobs.push(job);
            continue;
        }

        // Commit: validated output into exports, consumed inputs into the
        // library with a "used" timestamp so they are distinguishable from
        // staged-but-unused files.
        if let Err(err) = fsops::move_file(&out_tmp, &out_final) {
            warn!("failed to commit output {}: {err}", out_final.display());
            quarantine_count += 1;
            let q_out = quarantine_day.join(format!("{}_quarantaene.mp4", stem_of(&out_name)));
            if let Err(move_err) = fsops::move_file(&out_tmp, &q_out) {
                warn!("failed to park uncommitted output: {move_err}");
            }
            job.status = JobStatus::Quarantaene;
            job.reason = Some("move_fail_output".to_string());
            job.error = Some(err.to_string());
            job.output_quarantine = Some(q_out.display().to_string());
            persist_quarantine_job(
                &ledger_path,
                day,
                NewQuarantineJob {
                    run_id,
                    nr,
                    preset: &preset_id,
                    output_quarantine: &q_out,
                    staging_audio: &staged_audio,
                    staging_image: (!image_is_fallback).then_some(image.as_path()),
                    reason: "move_fail_output",
                    validation: check,
                },
                logs_dir,
                &save_opts,
            );
            report.jobs.push(job);
            continue;
        }

        let used_ts = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut inputs = CommittedInputs {
            audio: String::new(),
            image: String::new(),
        };
        let audio_final = library_audio_day.join(naming::used_name(&staged_audio, &used_ts));
        match fsops::move_file(&staged_audio, &audio_final) {
            Ok(()) => inputs.audio = audio_final.display().to_string(),
            Err(err) => {
                warn!("failed to commit audio input {}: {err}", staged_audio.display());
                report.repairs.push(Repair::MoveFailAudio {
                    file: staged_audio.display().to_string(),
                    error: err.to_string(),
                });
            }
        }
        if !image_is_fallback && image.exists() {
            let image_final = library_images_day.join(naming::used_name(&image, &used_ts));
            match fsops::move_file(&image, &image_final) {
                Ok(()) => inputs.image = image_final.display().to_string(),
                Err(err) => {
                    warn!("failed to commit image input {}: {err}", image.display());
                    report.repairs.push(Repair::MoveFailImage {
                        file: image.display().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        job.status = JobStatus::Fertig;
        job.output_final = Some(out_final.display().to_string());
        job.inputs_final = Some(inputs);
        report.jobs.push(job);
        ok_count += 1;
        info!("job {nr} committed: {}", out_final.display());
    }

    report.finished_at = Some(activity::timestamp());
    report.summary = RunSummary {
        fertig: ok_count,
        quarantaene: quarantine_count,
        gesamt: watch_scan.audios.len(),
    };
    let report_path = paths.reports_dir().join(format!("run_{run_id}.json"));
    store::save(&report_path, &report, &save_opts)?;

    log_activity(
        logs_dir,
        &format!(
            "Automatik Lauf {run_id}: fertig={ok_count} quarantaene={quarantine_count} gesamt={}",
            watch_scan.audios.len()
        ),
    );
    info!(
        "run {run_id} complete: {ok_count} done, {quarantine_count} quarantined, {} total",
        watch_scan.audios.len()
    );
    Ok(report_path)
}

/// Append to the day's ledger under the document lock. A persistence
/// failure here must not abort the batch; it is logged and the job record
/// in the report still carries the full story.
fn persist_quarantine_job(
    ledger_path: &Path,
    day: &str,
    new_job: NewQuarantineJob<'_>,
    logs_dir: &Path,
    save_opts: &SaveOptions,
) {
    let appended: Result<QuarantineLedger, StoreError> = store::update(
        ledger_path,
        || QuarantineLedger::new_for_day(day),
        |ledger| ledger.append(new_job),
        save_opts,
    );
    if let Err(err) = appended {
        error!(
            "failed to persist quarantine job in {}: {err}",
            ledger_path.display()
        );
        log_activity(
            logs_dir,
            &format!(
                "Quarantäne-Auftrag konnte nicht gespeichert werden ({}). Bitte prüfen.",
                ledger_path.display()
            ),
        );
    }
}

fn stem_of(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}
