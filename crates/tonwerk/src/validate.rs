use serde::{Deserialize, Serialize};

/// Result of checking a produced file's audio stream against policy.
/// Field names are part of the on-disk report and ledger format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCheck {
    pub audio_bitrate_kbps: Option<u64>,
    pub audio_samplerate_hz: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AudioCheck {
    /// A check that never ran, e.g. because the probe itself failed.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            audio_bitrate_kbps: None,
            audio_samplerate_hz: None,
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Decide whether an audio stream satisfies the configured policy.
///
/// The sample rate must match the target exactly. The bitrate floor is only
/// enforced when `min_bitrate_kbps` is positive; an undeterminable bitrate
/// counts as a failure while the floor is active.
pub fn validate_audio(
    bitrate_kbps: Option<u64>,
    samplerate_hz: Option<u64>,
    min_bitrate_kbps: u32,
    target_samplerate_hz: u32,
) -> AudioCheck {
    let ok_bitrate = if min_bitrate_kbps > 0 {
        bitrate_kbps.map_or(false, |kbps| kbps >= u64::from(min_bitrate_kbps))
    } else {
        true
    };
    let ok_samplerate = samplerate_hz == Some(u64::from(target_samplerate_hz));
    AudioCheck {
        audio_bitrate_kbps: bitrate_kbps,
        audio_samplerate_hz: samplerate_hz,
        ok: ok_bitrate && ok_samplerate,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bitrate_just_below_minimum_fails() {
        let check = validate_audio(Some(191), Some(48_000), 192, 48_000);
        assert!(!check.ok);
        assert_eq!(check.audio_bitrate_kbps, Some(191));
    }

    #[test]
    fn bitrate_at_minimum_passes() {
        let check = validate_audio(Some(192), Some(48_000), 192, 48_000);
        assert!(check.ok);
    }

    #[test]
    fn unknown_bitrate_passes_when_policy_disabled() {
        let check = validate_audio(None, Some(48_000), 0, 48_000);
        assert!(check.ok);
    }

    #[test]
    fn unknown_bitrate_fails_when_minimum_configured() {
        let check = validate_audio(None, Some(48_000), 192, 48_000);
        assert!(!check.ok);
    }

    #[test]
    fn samplerate_mismatch_fails_despite_generous_bitrate() {
        let check = validate_audio(Some(500), Some(44_100), 192, 48_000);
        assert!(!check.ok);
    }

    #[test]
    fn missing_samplerate_fails() {
        let check = validate_audio(Some(320), None, 0, 48_000);
        assert!(!check.ok);
    }

    #[test]
    fn failure_result_serializes_error_field() {
        let json = serde_json::to_value(AudioCheck::failure("probe exploded")).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "probe exploded");
        assert!(json["audio_bitrate_kbps"].is_null());
    }

    #[test]
    fn passing_result_omits_error_field() {
        let json = serde_json::to_value(validate_audio(Some(320), Some(48_000), 192, 48_000)).unwrap();
        assert_eq!(json["ok"], true);
        assert!(json.get("error").is_none());
    }

    proptest! {
        #[test]
        fn samplerate_mismatch_always_fails(
            bitrate in proptest::option::of(0u64..10_000),
            samplerate in 1u64..200_000,
            min in 0u32..1_000,
        ) {
            prop_assume!(samplerate != 48_000);
            let check = validate_audio(bitrate, Some(samplerate), min, 48_000);
            prop_assert!(!check.ok);
        }

        #[test]
        fn disabled_minimum_never_checks_bitrate(
            bitrate in proptest::option::of(0u64..10_000),
        ) {
            let check = validate_audio(bitrate, Some(48_000), 0, 48_000);
            prop_assert!(check.ok);
        }

        #[test]
        fn active_minimum_requires_measured_bitrate(min in 1u32..1_000) {
            let check = validate_audio(None, Some(48_000), min, 48_000);
            prop_assert!(!check.ok);
        }
    }
}
