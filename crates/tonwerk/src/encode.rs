//! Argument contract with the external encoder.
//!
//! ffmpeg is a black box to this tool: a fixed command shape in, a file and
//! an exit code out. Quality-relevant settings (AAC bitrate, sample rate)
//! always come from the audio policy; the video side is a stillimage-tuned
//! H.264 render at a fixed quality level.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

/// Env switch for internal test runs: drops the render resolution so an
/// end-to-end pass takes seconds instead of minutes. Audio policy is
/// unaffected.
pub const FAST_MODE_ENV: &str = "TONWERK_FAST";

pub fn fast_mode() -> bool {
    std::env::var(FAST_MODE_ENV).map(|v| v == "1").unwrap_or(false)
}

/// Both commands must resolve on PATH before any pipeline runs.
pub fn encoder_available() -> bool {
    which::which("ffmpeg").is_ok() && which::which("ffprobe").is_ok()
}

/// Render geometry for a preset id. Unknown ids get the 16:9 default.
pub fn preset_dimensions(preset_id: &str, fast: bool) -> (u32, u32, u32) {
    let portrait = preset_id == "shorts_9_16_ton_safe";
    match (portrait, fast) {
        (false, false) => (1920, 1080, 30),
        (false, true) => (640, 360, 24),
        (true, false) => (1080, 1920, 30),
        (true, true) => (360, 640, 24),
    }
}

/// One still-image + audio render job.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub image: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio_bitrate_kbps: u32,
    pub audio_samplerate_hz: u32,
    /// `None` lets the encoder pick its own thread count.
    pub threads: Option<u32>,
}

impl EncodeRequest {
    /// The full ffmpeg argument list. The still image is looped, the output
    /// duration follows the shorter input, and the file is written
    /// fast-start for immediate playback.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
        ];
        if let Some(threads) = self.threads {
            args.push("-threads".into());
            args.push(threads.to_string());
        }
        args.extend([
            "-loop".into(),
            "1".into(),
            "-i".into(),
            self.image.display().to_string(),
            "-i".into(),
            self.audio.display().to_string(),
            "-vf".into(),
            format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
                w = self.width,
                h = self.height
            ),
            "-c:v".into(),
            "libx264".into(),
            "-tune".into(),
            "stillimage".into(),
            "-preset".into(),
            "medium".into(),
            "-crf".into(),
            "19".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-r".into(),
            self.fps.to_string(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            format!("{}k", self.audio_bitrate_kbps),
            "-ar".into(),
            self.audio_samplerate_hz.to_string(),
            "-shortest".into(),
            "-movflags".into(),
            "+faststart".into(),
            self.output.display().to_string(),
        ]);
        args
    }
}

/// Run the encoder. A non-zero exit is an error carrying stderr; cleanup of
/// any partial output stays with the caller, which knows whether to park it
/// in quarantine or discard it.
pub async fn run_encode(request: &EncodeRequest) -> Result<()> {
    if let Some(parent) = request.output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
    }

    let output = Command::new("ffmpeg")
        .args(request.to_args())
        .output()
        .await
        .with_context(|| format!("failed to execute ffmpeg for: {}", request.audio.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "ffmpeg failed (exit code {}): {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EncodeRequest {
        EncodeRequest {
            image: PathBuf::from("/staging/images/cover.jpg"),
            audio: PathBuf::from("/staging/audio/track.wav"),
            output: PathBuf::from("/tmp/out.mp4"),
            width: 1920,
            height: 1080,
            fps: 30,
            audio_bitrate_kbps: 320,
            audio_samplerate_hz: 48_000,
            threads: None,
        }
    }

    #[test]
    fn args_carry_the_fixed_contract() {
        let args = request().to_args();
        let joined = args.join(" ");
        assert!(joined.contains("-loop 1"));
        assert!(joined.contains("scale=1920:1080:force_original_aspect_ratio=increase,crop=1920:1080"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-tune stillimage"));
        assert!(joined.contains("-crf 19"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-b:a 320k"));
        assert!(joined.contains("-ar 48000"));
        assert!(joined.contains("-shortest"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(args.ends_with(&["/tmp/out.mp4".to_string()]));
    }

    #[test]
    fn threads_flag_only_appears_when_configured() {
        assert!(!request().to_args().join(" ").contains("-threads"));
        let mut capped = request();
        capped.threads = Some(2);
        assert!(capped.to_args().join(" ").contains("-threads 2"));
    }

    #[test]
    fn preset_geometry_table() {
        assert_eq!(preset_dimensions("youtube_hd_ton_safe", false), (1920, 1080, 30));
        assert_eq!(preset_dimensions("youtube_hd_ton_safe", true), (640, 360, 24));
        assert_eq!(preset_dimensions("shorts_9_16_ton_safe", false), (1080, 1920, 30));
        assert_eq!(preset_dimensions("shorts_9_16_ton_safe", true), (360, 640, 24));
        assert_eq!(preset_dimensions("unknown", false), (1920, 1080, 30));
    }
}
