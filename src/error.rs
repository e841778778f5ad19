use std::{io, path::PathBuf};
use thiserror::Error;

/// The yt-dlp executable could not be launched. Fatal: the GUI never starts.
#[derive(Debug, Error)]
#[error("yt-dlp is not available at `{program}`: {reason}")]
pub struct RuntimeMissing {
    pub program: String,
    pub reason: String,
}

/// Failure while making sure the ffmpeg binary exists on disk.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("filesystem error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ffmpeg download failed with HTTP status {0}")]
    Http(reqwest::StatusCode),
    #[error("ffmpeg download failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("could not read the ffmpeg zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("could not unpack the ffmpeg archive: {0}")]
    Unpack(#[source] io::Error),
    #[error("`{0}` was not found in the downloaded archive")]
    BinaryNotInArchive(String),
    #[error("ffmpeg at {path:?} is not usable: {reason}")]
    Probe { path: PathBuf, reason: String },
}

impl ProvisionError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Failure reported by the yt-dlp adapter.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error while running yt-dlp: {0}")]
    Io(#[from] io::Error),
    #[error("could not parse video info: {0}")]
    Json(#[from] serde_json::Error),
    /// yt-dlp exited unsuccessfully; holds its own error message.
    #[error("{0}")]
    Failed(String),
    #[error("yt-dlp finished without reporting an output file")]
    MissingOutput,
}

/// Why a download request ended in the FAILED state.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// The worker stopped without producing an outcome, e.g. a panicking adapter.
    #[error("{0}")]
    WorkerLost(String),
}
