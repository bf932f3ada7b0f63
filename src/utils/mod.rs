pub mod logger;
pub mod process;
pub mod revision;

use std::path::PathBuf;
use which::which;

/// Finds an executable in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf, String> {
    which(name).map_err(|_| {
        format!(
            "{} executable not found in PATH. Please ensure the required client tools are installed and in your PATH.",
            name
        )
    })
}
