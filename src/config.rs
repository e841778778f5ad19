use std::path::PathBuf;

use anyhow::Result;

use crate::provision::default_archive_url;

pub const YTDLP_VAR: &str = "MEDIA_DL_YTDLP";
pub const BIN_DIR_VAR: &str = "MEDIA_DL_BIN_DIR";
pub const FFMPEG_URL_VAR: &str = "MEDIA_DL_FFMPEG_URL";
pub const OUTPUT_DIR_VAR: &str = "MEDIA_DL_OUTPUT_DIR";
pub const PROBE_FFMPEG_VAR: &str = "MEDIA_DL_PROBE_FFMPEG";

/// Runtime settings, resolved once at startup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    /// yt-dlp executable, a bare name is looked up on PATH
    pub ytdlp_program: PathBuf,
    /// Directory holding the provisioned ffmpeg
    pub binaries_dir: PathBuf,
    pub ffmpeg_archive_url: String,
    /// Initial value of the "Save to" field
    pub output_dir: PathBuf,
    /// Run `ffmpeg -version` before each download
    pub probe_ffmpeg: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let probe_ffmpeg = match value(PROBE_FFMPEG_VAR) {
            None => true,
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                log::warn!("ignoring {PROBE_FFMPEG_VAR}={raw:?}, expected true or false");
                true
            }),
        };

        Self {
            ytdlp_program: value(YTDLP_VAR).map_or_else(default_ytdlp, PathBuf::from),
            binaries_dir: value(BIN_DIR_VAR).map_or_else(default_binaries_dir, PathBuf::from),
            ffmpeg_archive_url: value(FFMPEG_URL_VAR).unwrap_or_else(|| default_archive_url().to_owned()),
            output_dir: value(OUTPUT_DIR_VAR).map_or_else(default_output_dir, PathBuf::from),
            probe_ffmpeg,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_ytdlp() -> PathBuf {
    PathBuf::from(if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" })
}

/// `scripts/` next to the executable, like a portable install.
fn default_binaries_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("scripts")))
        .unwrap_or_else(|| PathBuf::from("scripts"))
}

fn default_output_dir() -> PathBuf {
    std::env::current_dir()
        .ok()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Locates a `.env` file next to the executable or in the working directory.
pub fn find_dotenv() -> Result<Option<PathBuf>> {
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(exe_dir) = current_exe.parent() {
            let candidate = exe_dir.join(".env");
            if candidate.exists() {
                return Ok(Some(candidate));
            }
        }
    }

    let candidate = std::env::current_dir()?.join(".env");
    if candidate.exists() {
        return Ok(Some(candidate));
    }
    Ok(None)
}

/// Loads `.env` into the process environment. Returns the file used, if any.
pub fn load_environment() -> Result<Option<PathBuf>> {
    let found = find_dotenv()?;
    if let Some(path) = &found {
        dotenv::from_path(path)?;
    }
    Ok(found)
}
