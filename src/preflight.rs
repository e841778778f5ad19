use std::{path::Path, process::Command};

use crate::error::RuntimeMissing;

/// Checks that yt-dlp can be launched and returns its version string.
///
/// Runs before the GUI exists, so it blocks on purpose.
pub fn check_runtime(program: &Path) -> Result<String, RuntimeMissing> {
    let missing = |reason: String| RuntimeMissing {
        program: program.display().to_string(),
        reason,
    };

    let output = Command::new(program)
        .arg("--version")
        .output()
        .map_err(|e| missing(e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = match stderr.lines().last().map(str::trim) {
            Some(detail) if !detail.is_empty() => format!("`--version` exited with {}: {detail}", output.status),
            _ => format!("`--version` exited with {}", output.status),
        };
        return Err(missing(reason));
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    log::info!("using yt-dlp {version} from {}", program.display());
    Ok(version)
}
