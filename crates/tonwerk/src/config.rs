//! Settings and automation rules.
//!
//! Settings are required and strict: the pipeline refuses to run against a
//! document with missing keys, and the failure names them. Rules are
//! optional and forgiving: a missing or broken rules file means defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PreflightError;
use crate::naming;
use crate::perf::PerformanceConfig;
use crate::store;

/// Raw settings document. Required entries stay optional or empty here so a
/// broken file can be reported with the exact missing keys instead of a
/// parse abort; [`Settings::validate`] turns it into the resolved form the
/// pipeline actually uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: Option<PathsSection>,
    pub audio: Option<AudioSection>,
    pub performance: PerformanceConfig,
    pub naming: NamingSection,
}

/// An empty string counts as missing, matching how the desktop shell writes
/// cleared fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub watch_folder: String,
    pub base_data_dir: String,
    pub exports_dir: String,
    pub library_audio_dir: String,
    pub library_images_dir: String,
    pub quarantine_dir: String,
    pub quarantine_jobs_dir: String,
    pub reports_dir: String,
    pub staging_dir: String,
    pub trash_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub target_bitrate_kbps: Option<u32>,
    pub target_samplerate_hz: Option<u32>,
    pub min_bitrate_kbps: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingSection {
    pub template_batch: String,
}

impl Default for NamingSection {
    fn default() -> Self {
        Self {
            template_batch: naming::DEFAULT_BATCH_TEMPLATE.to_string(),
        }
    }
}

impl Settings {
    /// Load a settings document. `.toml` files parse as TOML, everything
    /// else as JSON. Unlike rules, an unreadable settings file is an error:
    /// nothing may run against guessed settings.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .with_context(|| format!("failed to parse TOML settings: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse JSON settings: {}", path.display()))
        }
    }

    /// Check the required sections and keys, returning either the resolved
    /// settings or the full list of what is missing.
    pub fn validate(&self) -> Result<ResolvedSettings, PreflightError> {
        let mut missing: Vec<&'static str> = Vec::new();

        let paths = self.paths.clone().unwrap_or_else(|| {
            missing.push("paths");
            PathsSection::default()
        });
        let audio = self.audio.clone().unwrap_or_else(|| {
            missing.push("audio");
            AudioSection::default()
        });

        let path_keys: [(&'static str, &str); 10] = [
            ("watch_folder", &paths.watch_folder),
            ("base_data_dir", &paths.base_data_dir),
            ("exports_dir", &paths.exports_dir),
            ("library_audio_dir", &paths.library_audio_dir),
            ("library_images_dir", &paths.library_images_dir),
            ("quarantine_dir", &paths.quarantine_dir),
            ("quarantine_jobs_dir", &paths.quarantine_jobs_dir),
            ("reports_dir", &paths.reports_dir),
            ("staging_dir", &paths.staging_dir),
            ("trash_dir", &paths.trash_dir),
        ];
        for (key, value) in path_keys {
            if value.is_empty() {
                missing.push(key);
            }
        }
        if audio.target_bitrate_kbps.is_none() {
            missing.push("target_bitrate_kbps");
        }
        if audio.target_samplerate_hz.is_none() {
            missing.push("target_samplerate_hz");
        }
        if audio.min_bitrate_kbps.is_none() {
            missing.push("min_bitrate_kbps");
        }

        let (
            Some(target_bitrate_kbps),
            Some(target_samplerate_hz),
            Some(min_bitrate_kbps),
            true,
        ) = (
            audio.target_bitrate_kbps,
            audio.target_samplerate_hz,
            audio.min_bitrate_kbps,
            missing.is_empty(),
        )
        else {
            return Err(PreflightError::SettingsIncomplete {
                missing: missing.join(", "),
            });
        };

        Ok(ResolvedSettings {
            paths: ResolvedPaths {
                watch_folder: PathBuf::from(&paths.watch_folder),
                base_data_dir: PathBuf::from(&paths.base_data_dir),
                exports_dir: paths.exports_dir,
                library_audio_dir: paths.library_audio_dir,
                library_images_dir: paths.library_images_dir,
                quarantine_dir: paths.quarantine_dir,
                quarantine_jobs_dir: paths.quarantine_jobs_dir,
                reports_dir: paths.reports_dir,
                staging_dir: paths.staging_dir,
                trash_dir: paths.trash_dir,
            },
            audio: AudioPolicy {
                target_bitrate_kbps,
                target_samplerate_hz,
                min_bitrate_kbps,
            },
            performance: self.performance.clone(),
            naming: self.naming.clone(),
        })
    }
}

/// Settings after required-key validation: every path concrete, every audio
/// number present.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub paths: ResolvedPaths,
    pub audio: AudioPolicy,
    pub performance: PerformanceConfig,
    pub naming: NamingSection,
}

#[derive(Debug, Clone, Copy)]
pub struct AudioPolicy {
    pub target_bitrate_kbps: u32,
    pub target_samplerate_hz: u32,
    pub min_bitrate_kbps: u32,
}

/// The directory layout of one data tree. The named subdirectories are
/// relative to `base_data_dir`; day-keyed folders hang below them.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub watch_folder: PathBuf,
    pub base_data_dir: PathBuf,
    pub exports_dir: String,
    pub library_audio_dir: String,
    pub library_images_dir: String,
    pub quarantine_dir: String,
    pub quarantine_jobs_dir: String,
    pub reports_dir: String,
    pub staging_dir: String,
    pub trash_dir: String,
}

impl ResolvedPaths {
    pub fn staging_root(&self) -> PathBuf {
        self.base_data_dir.join(&self.staging_dir)
    }

    /// Run-level lock location. Fixed path so any number of schedulers
    /// agree on it.
    pub fn automation_lock(&self) -> PathBuf {
        self.staging_root().join("automation.lock")
    }

    pub fn temp_renders(&self) -> PathBuf {
        self.staging_root().join("temp_renders")
    }

    pub fn staging_day(&self, day: &str) -> PathBuf {
        self.staging_root().join(day)
    }

    pub fn exports_day(&self, day: &str) -> PathBuf {
        self.base_data_dir.join(&self.exports_dir).join(day)
    }

    pub fn quarantine_day(&self, day: &str) -> PathBuf {
        self.base_data_dir.join(&self.quarantine_dir).join(day)
    }

    pub fn library_audio_day(&self, day: &str) -> PathBuf {
        self.base_data_dir.join(&self.library_audio_dir).join(day)
    }

    pub fn library_images_day(&self, day: &str) -> PathBuf {
        self.base_data_dir.join(&self.library_images_dir).join(day)
    }

    pub fn quarantine_jobs_dir(&self) -> PathBuf {
        self.base_data_dir.join(&self.quarantine_jobs_dir)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.base_data_dir.join(&self.reports_dir)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_data_dir.join("logs")
    }

    /// Create the named subdirectories. Day folders are created lazily by
    /// the run that needs them.
    pub fn ensure_structure(&self) -> Result<()> {
        for rel in [
            &self.exports_dir,
            &self.library_audio_dir,
            &self.library_images_dir,
            &self.quarantine_dir,
            &self.quarantine_jobs_dir,
            &self.reports_dir,
            &self.staging_dir,
            &self.trash_dir,
        ] {
            let dir = self.base_data_dir.join(rel);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create directory: {}", dir.display()))?;
        }
        std::fs::create_dir_all(self.logs_dir())
            .with_context(|| format!("failed to create logs directory: {}", self.logs_dir().display()))?;
        Ok(())
    }
}

/// Automation rules: scan filters, pairing fallback, preset selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    pub enabled: bool,
    pub scan: ScanRules,
    pub pairing: PairingRules,
    pub presets: PresetRules,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            enabled: true,
            scan: ScanRules::default(),
            pairing: PairingRules::default(),
            presets: PresetRules::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRules {
    pub audio_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub stability_check_secs: u64,
}

impl Default for ScanRules {
    fn default() -> Self {
        Self {
            audio_extensions: [".mp3", ".wav", ".flac", ".m4a"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            image_extensions: [".jpg", ".jpeg", ".png", ".webp"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            stability_check_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingRules {
    pub fallback_image: PathBuf,
}

impl Default for PairingRules {
    fn default() -> Self {
        Self {
            fallback_image: PathBuf::from("assets/default_assets/preset_cover.jpg"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetRules {
    pub default_preset_id: String,
}

impl Default for PresetRules {
    fn default() -> Self {
        Self {
            default_preset_id: "youtube_hd_ton_safe".to_string(),
        }
    }
}

impl Rules {
    /// Missing or broken rules are not fatal; defaults apply.
    pub fn load(path: &Path) -> Self {
        store::load_or_default(path)
    }

    pub fn audio_extension_set(&self) -> HashSet<String> {
        self.scan
            .audio_extensions
            .iter()
            .map(|e| e.to_lowercase())
            .collect()
    }

    pub fn image_extension_set(&self) -> HashSet<String> {
        self.scan
            .image_extensions
            .iter()
            .map(|e| e.to_lowercase())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_settings() -> Settings {
        serde_json::from_value(serde_json::json!({
            "paths": {
                "watch_folder": "/watch",
                "base_data_dir": "/data",
                "exports_dir": "exports",
                "library_audio_dir": "library/audio",
                "library_images_dir": "library/images",
                "quarantine_dir": "quarantine",
                "quarantine_jobs_dir": "quarantine_jobs",
                "reports_dir": "reports",
                "staging_dir": "staging",
                "trash_dir": "trash"
            },
            "audio": {
                "target_bitrate_kbps": 320,
                "target_samplerate_hz": 48000,
                "min_bitrate_kbps": 192
            }
        }))
        .unwrap()
    }

    #[test]
    fn complete_settings_validate() {
        let resolved = complete_settings().validate().unwrap();
        assert_eq!(resolved.audio.target_bitrate_kbps, 320);
        assert_eq!(resolved.paths.watch_folder, PathBuf::from("/watch"));
        assert_eq!(
            resolved.paths.automation_lock(),
            PathBuf::from("/data/staging/automation.lock")
        );
        assert_eq!(
            resolved.paths.exports_day("2026-08-07"),
            PathBuf::from("/data/exports/2026-08-07")
        );
    }

    #[test]
    fn missing_keys_are_listed_by_name() {
        let mut settings = complete_settings();
        if let Some(paths) = settings.paths.as_mut() {
            paths.watch_folder.clear();
            paths.trash_dir.clear();
        }
        settings.audio = Some(AudioSection {
            target_bitrate_kbps: Some(320),
            target_samplerate_hz: None,
            min_bitrate_kbps: Some(192),
        });
        let err = settings.validate().unwrap_err();
        let PreflightError::SettingsIncomplete { missing } = err else {
            panic!("expected incomplete settings");
        };
        assert!(missing.contains("watch_folder"));
        assert!(missing.contains("trash_dir"));
        assert!(missing.contains("target_samplerate_hz"));
        assert!(!missing.contains("exports_dir"));
    }

    #[test]
    fn absent_sections_are_reported() {
        let err = Settings::default().validate().unwrap_err();
        let PreflightError::SettingsIncomplete { missing } = err else {
            panic!("expected incomplete settings");
        };
        assert!(missing.contains("paths"));
        assert!(missing.contains("audio"));
    }

    #[test]
    fn rules_default_when_file_absent() {
        let rules = Rules::load(Path::new("/definitely/not/here/automation_rules.json"));
        assert!(rules.enabled);
        assert!(rules.audio_extension_set().contains(".wav"));
        assert!(rules.image_extension_set().contains(".jpg"));
        assert_eq!(rules.scan.stability_check_secs, 8);
        assert_eq!(rules.presets.default_preset_id, "youtube_hd_ton_safe");
    }

    #[test]
    fn rule_extensions_normalize_to_lowercase() {
        let rules: Rules = serde_json::from_value(serde_json::json!({
            "scan": {"audio_extensions": [".WAV"], "image_extensions": [".JPG"]}
        }))
        .unwrap();
        assert!(rules.audio_extension_set().contains(".wav"));
        assert!(rules.image_extension_set().contains(".jpg"));
    }

    #[test]
    fn toml_settings_parse() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
[paths]
watch_folder = "/watch"
base_data_dir = "/data"
exports_dir = "exports"
library_audio_dir = "library/audio"
library_images_dir = "library/images"
quarantine_dir = "quarantine"
quarantine_jobs_dir = "quarantine_jobs"
reports_dir = "reports"
staging_dir = "staging"
trash_dir = "trash"

[audio]
target_bitrate_kbps = 320
target_samplerate_hz = 48000
min_bitrate_kbps = 192
"#,
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert!(settings.validate().is_ok());
    }
}
