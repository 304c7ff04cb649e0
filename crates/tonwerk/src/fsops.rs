//! Small filesystem helpers shared by the run loop and the worker.

use std::io;
use std::path::Path;

/// Move a file, falling back to copy + delete when the rename crosses a
/// filesystem boundary.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}
