use std::path::PathBuf;

use crate::error::TaskError;

/// Output kind chosen by the user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DownloadMode {
    /// Extract the audio track and encode it as MP3
    #[default]
    Audio,
    /// Best video and best audio muxed into MP4
    Video,
}

impl DownloadMode {
    pub fn label(self) -> &'static str {
        match self {
            DownloadMode::Audio => "MP3",
            DownloadMode::Video => "MP4",
        }
    }

    /// File extension of the final artifact
    pub fn extension(self) -> &'static str {
        match self {
            DownloadMode::Audio => "mp3",
            DownloadMode::Video => "mp4",
        }
    }
}

/// One download as submitted from the UI. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub mode: DownloadMode,
    pub destination_directory: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, mode: DownloadMode, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            mode,
            destination_directory: destination.into(),
        }
    }
}

/// Lifecycle of a download task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskStatus {
    #[default]
    Idle,
    FetchingInfo,
    Running,
    Cancelling,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Idle => "Idle",
            TaskStatus::FetchingInfo => "🔎 Fetching info",
            TaskStatus::Running => "⬇️ Downloading",
            TaskStatus::Cancelling => "⏹ Cancelling",
            TaskStatus::Done => "✅ Done",
            TaskStatus::Failed => "❌ Failed",
        }
    }
}

/// Metadata shown before and during a download
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub title: String,
    pub uploader: String,
    pub duration_secs: u64,
    pub thumbnail_url: Option<String>,
}

/// Read-only copy of the task state handed to the UI
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    /// Progress percentage (0.0 to 100.0)
    pub progress_percent: f32,
    /// Once true, stays true for the rest of the request
    pub cancel_requested: bool,
    pub info: Option<VideoInfo>,
    /// Human-readable summary of the terminal state
    pub message: Option<String>,
}

/// Terminal result of a request
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(PathBuf),
    Cancelled,
    Failed(TaskError),
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) | TaskOutcome::Cancelled => TaskStatus::Done,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            TaskOutcome::Completed(path) => format!("Download finished: {}", path.display()),
            TaskOutcome::Cancelled => "Download cancelled.".to_owned(),
            TaskOutcome::Failed(err) => format!("Error: {err}"),
        }
    }
}

/// Notifications sent from the worker to whoever observes the task
#[derive(Debug)]
pub enum TaskEvent {
    Status(TaskStatus),
    Info(VideoInfo),
    Progress(f32),
    /// Sent exactly once, always last
    Finished(TaskOutcome),
}
