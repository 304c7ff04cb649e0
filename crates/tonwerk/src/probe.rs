use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;

/// Parsed `ffprobe -print_format json` output, reduced to the fields the
/// audio policy needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeData {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: FfprobeFormat,
}

/// Container-level metadata. The bitrate here is the fallback source when a
/// stream carries none of its own.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeFormat {
    pub bit_rate: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub sample_rate: Option<String>,
    pub bit_rate: Option<String>,
}

/// Run ffprobe and parse its JSON output.
pub async fn probe_file(path: &Path) -> Result<FfprobeData> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to execute ffprobe for: {}", path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "ffprobe failed (exit code {}) for {}: {}",
            output.status.code().unwrap_or(-1),
            path.display(),
            stderr.trim()
        );
    }

    let json_str = String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    let data: FfprobeData = serde_json::from_str(&json_str)
        .with_context(|| format!("failed to parse ffprobe JSON for: {}", path.display()))?;
    Ok(data)
}

impl FfprobeData {
    /// Bitrate (kbps) and sample rate of the first audio stream. The stream
    /// bitrate wins over the container bitrate. A file without an audio
    /// stream yields neither measurement.
    pub fn audio_summary(&self) -> (Option<u64>, Option<u64>) {
        let Some(stream) = self
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"))
        else {
            return (None, None);
        };
        let samplerate = stream
            .sample_rate
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok());
        let bitrate = stream
            .bit_rate
            .as_deref()
            .or(self.format.bit_rate.as_deref())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|bps| bps / 1000);
        (bitrate, samplerate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> FfprobeData {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn audio_summary_prefers_stream_bitrate() {
        let data = parse(
            r#"{
                "streams": [
                    {"codec_type": "video", "bit_rate": "9000000"},
                    {"codec_type": "audio", "sample_rate": "48000", "bit_rate": "320000"}
                ],
                "format": {"bit_rate": "1000000"}
            }"#,
        );
        assert_eq!(data.audio_summary(), (Some(320), Some(48_000)));
    }

    #[test]
    fn audio_summary_falls_back_to_format_bitrate() {
        let data = parse(
            r#"{
                "streams": [{"codec_type": "audio", "sample_rate": "44100"}],
                "format": {"bit_rate": "192000"}
            }"#,
        );
        assert_eq!(data.audio_summary(), (Some(192), Some(44_100)));
    }

    #[test]
    fn missing_audio_stream_yields_no_measurements() {
        let data = parse(r#"{"streams": [{"codec_type": "video"}], "format": {}}"#);
        assert_eq!(data.audio_summary(), (None, None));
    }

    #[test]
    fn unparsable_numbers_are_treated_as_absent() {
        let data = parse(
            r#"{
                "streams": [{"codec_type": "audio", "sample_rate": "N/A", "bit_rate": "N/A"}],
                "format": {}
            }"#,
        );
        assert_eq!(data.audio_summary(), (None, None));
    }
}
