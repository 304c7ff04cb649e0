use std::path::PathBuf;
use thiserror::Error;

/// Precondition failures that abort the current invocation before any file
/// has been touched. Everything downstream of these checks is handled per
/// item and never terminates the process.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("settings unreadable: {0}")]
    SettingsUnreadable(String),
    #[error("settings incomplete, missing: {missing}")]
    SettingsIncomplete { missing: String },
    #[error("ffmpeg/ffprobe not found on PATH")]
    EncoderMissing,
    #[error("watch folder missing: {0}")]
    WatchFolderMissing(PathBuf),
}

impl PreflightError {
    /// Exit-code contract shared with the GUI and the test harness:
    /// 1 = configuration problem, 2 = environment problem.
    pub fn exit_code(&self) -> i32 {
        match self {
            PreflightError::SettingsUnreadable(_)
            | PreflightError::SettingsIncomplete { .. }
            | PreflightError::WatchFolderMissing(_) => 1,
            PreflightError::EncoderMissing => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_exit_code_1() {
        let err = PreflightError::SettingsIncomplete {
            missing: "watch_folder".to_string(),
        };
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            PreflightError::WatchFolderMissing(PathBuf::from("/tmp/nope")).exit_code(),
            1
        );
    }

    #[test]
    fn environment_errors_map_to_exit_code_2() {
        assert_eq!(PreflightError::EncoderMissing.exit_code(), 2);
    }
}
