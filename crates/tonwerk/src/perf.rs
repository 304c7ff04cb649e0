use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Encoder thread budget. Eco mode keeps the nightly batch from starving an
/// otherwise-in-use machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub eco_mode: bool,
    /// Explicit eco cap; 0 falls back to half of the detected cores.
    pub eco_threads: u32,
    /// Explicit thread count outside eco mode; 0 lets the encoder decide.
    pub normal_threads: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            eco_mode: false,
            eco_threads: 2,
            normal_threads: 0,
        }
    }
}

/// `None` means "no -threads flag", i.e. the encoder auto-detects.
pub fn encoder_threads(perf: &PerformanceConfig) -> Option<u32> {
    if perf.eco_mode {
        if perf.eco_threads > 0 {
            return Some(perf.eco_threads);
        }
        return Some(half_of_detected_cores());
    }
    (perf.normal_threads > 0).then_some(perf.normal_threads)
}

fn half_of_detected_cores() -> u32 {
    let sys = System::new_all();
    let cores = sys.cpus().len().max(1) as u32;
    (cores / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eco_mode_uses_explicit_cap() {
        let perf = PerformanceConfig {
            eco_mode: true,
            eco_threads: 2,
            normal_threads: 8,
        };
        assert_eq!(encoder_threads(&perf), Some(2));
    }

    #[test]
    fn eco_mode_without_cap_halves_detected_cores() {
        let perf = PerformanceConfig {
            eco_mode: true,
            eco_threads: 0,
            normal_threads: 0,
        };
        let threads = encoder_threads(&perf).expect("eco mode always caps");
        assert!(threads >= 1);
    }

    #[test]
    fn normal_mode_uses_explicit_count() {
        let perf = PerformanceConfig {
            eco_mode: false,
            eco_threads: 2,
            normal_threads: 6,
        };
        assert_eq!(encoder_threads(&perf), Some(6));
    }

    #[test]
    fn normal_mode_defaults_to_encoder_auto_detect() {
        assert_eq!(encoder_threads(&PerformanceConfig::default()), None);
    }
}
