use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::mpsc::{UnboundedSender, unbounded_channel},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ExtractionError,
    model::{DownloadMode, VideoInfo},
    progress::{PROGRESS_PREFIX, parse_progress_from_line},
};

/// Prefix of the line printed by `--print after_move:...`
const SAVED_PREFIX: &str = "saved:";

/// Everything yt-dlp needs to know besides the URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadOptions {
    pub mode: DownloadMode,
    pub output_directory: PathBuf,
    /// Path to the provisioned ffmpeg binary
    pub ffmpeg_location: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed(PathBuf),
    Cancelled,
}

/// The two capabilities the core needs from the media extractor.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Metadata-only query; never downloads media.
    async fn fetch_info(&self, url: &str) -> Result<VideoInfo, ExtractionError>;

    /// Downloads and converts `url`, sending percentages on `progress`.
    ///
    /// Implementations check `cancel` at their own checkpoints and return
    /// [`DownloadOutcome::Cancelled`] once they observe it.
    async fn run_download(
        &self,
        url: &str,
        options: &DownloadOptions,
        progress: UnboundedSender<f32>,
        cancel: CancellationToken,
    ) -> Result<DownloadOutcome, ExtractionError>;
}

/// [`ExtractionClient`] backed by the `yt-dlp` executable.
#[derive(Clone, Debug)]
pub struct YtDlpClient {
    program: PathBuf,
}

impl YtDlpClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> ExtractionError {
        ExtractionError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ExtractionClient for YtDlpClient {
    async fn fetch_info(&self, url: &str) -> Result<VideoInfo, ExtractionError> {
        log::info!("fetching video info for {url}");
        let output = self
            .command()
            .args(info_args(url))
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Failed(failure_message(
                stderr.lines(),
                output.status,
            )));
        }
        parse_info(&output.stdout)
    }

    async fn run_download(
        &self,
        url: &str,
        options: &DownloadOptions,
        progress: UnboundedSender<f32>,
        cancel: CancellationToken,
    ) -> Result<DownloadOutcome, ExtractionError> {
        if cancel.is_cancelled() {
            return Ok(DownloadOutcome::Cancelled);
        }
        tokio::fs::create_dir_all(&options.output_directory).await?;

        let args = download_args(url, options);
        log::info!("running {} {}", self.program.display(), args.join(" "));
        let mut child = self
            .command()
            .args(&args)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Both pipes feed one channel so progress is seen whichever stream
        // yt-dlp decides to write it to.
        let (line_tx, mut line_rx) = unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, Stream::Stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, Stream::Stderr, line_tx);
        }

        let mut report = OutputReport::default();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return abort(&mut child).await,
                line = line_rx.recv() => match line {
                    Some((stream, line)) => report.absorb(stream, &line, &progress),
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return abort(&mut child).await,
            status = child.wait() => status?,
        };
        if cancel.is_cancelled() {
            return Ok(DownloadOutcome::Cancelled);
        }
        if !status.success() {
            return Err(ExtractionError::Failed(report.failure_message(status)));
        }
        report
            .output_path()
            .map(DownloadOutcome::Completed)
            .ok_or(ExtractionError::MissingOutput)
    }
}

/// Kills the yt-dlp process and reports the download as cancelled.
///
/// Only yt-dlp itself is signalled. An ffmpeg it already launched for
/// `--extract-audio` or the mp4 merge is not part of the kill and may keep
/// writing its output until it finishes on its own; that file is left in
/// place like any other partial output.
async fn abort(child: &mut Child) -> Result<DownloadOutcome, ExtractionError> {
    log::info!("cancellation observed, stopping yt-dlp");
    if let Err(e) = child.kill().await {
        log::warn!("failed to stop yt-dlp: {e}");
    }
    Ok(DownloadOutcome::Cancelled)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

fn forward_lines<R>(reader: R, stream: Stream, tx: UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((stream, line)).is_err() {
                break;
            }
        }
    });
}

/// What we learned from yt-dlp's output while it ran
#[derive(Debug, Default)]
struct OutputReport {
    saved: Option<PathBuf>,
    last_destination: Option<PathBuf>,
    last_error: Option<String>,
    last_stderr: Option<String>,
}

impl OutputReport {
    fn absorb(&mut self, stream: Stream, line: &str, progress: &UnboundedSender<f32>) {
        log::debug!("yt-dlp> {line}");
        if let Some(pct) = parse_progress_from_line(line) {
            let _ = progress.send(pct);
            return;
        }
        if stream == Stream::Stdout {
            if let Some(path) = line.strip_prefix(SAVED_PREFIX) {
                self.saved = Some(PathBuf::from(path.trim()));
                return;
            }
        }
        if let Some(path) = parse_destination(line) {
            self.last_destination = Some(path);
        }
        if stream == Stream::Stderr && !line.trim().is_empty() {
            if let Some(message) = error_message(line) {
                self.last_error = Some(message);
            }
            self.last_stderr = Some(line.trim().to_owned());
        }
    }

    fn output_path(self) -> Option<PathBuf> {
        self.saved.or(self.last_destination)
    }

    fn failure_message(&self, status: ExitStatus) -> String {
        self.last_error
            .clone()
            .or_else(|| self.last_stderr.clone())
            .unwrap_or_else(|| format!("yt-dlp exited with {status}"))
    }
}

fn error_message(line: &str) -> Option<String> {
    line.find("ERROR:")
        .map(|idx| line[idx + "ERROR:".len()..].trim().to_owned())
}

fn failure_message<'a>(lines: impl Iterator<Item = &'a str>, status: ExitStatus) -> String {
    let mut last_error = None;
    let mut last_line = None;
    for line in lines.filter(|l| !l.trim().is_empty()) {
        if let Some(message) = error_message(line) {
            last_error = Some(message);
        }
        last_line = Some(line.trim());
    }
    last_error
        .or_else(|| last_line.map(str::to_owned))
        .unwrap_or_else(|| format!("yt-dlp exited with {status}"))
}

/// Extracts the file path from yt-dlp's "where am I writing" messages.
fn parse_destination(line: &str) -> Option<PathBuf> {
    if let Some(idx) = line.find("Destination: ") {
        let path = line[idx + "Destination: ".len()..].trim();
        return (!path.is_empty()).then(|| PathBuf::from(path));
    }
    if let Some(idx) = line.find("Merging formats into ") {
        let path = line[idx + "Merging formats into ".len()..].trim().trim_matches('"');
        return (!path.is_empty()).then(|| PathBuf::from(path));
    }
    let rest = line.strip_prefix("[download] ")?;
    let path = rest.strip_suffix(" has already been downloaded")?;
    Some(PathBuf::from(path.trim()))
}

fn info_args(url: &str) -> Vec<String> {
    vec![
        "-J".to_owned(),
        "--no-playlist".to_owned(),
        "--skip-download".to_owned(),
        url.to_owned(),
    ]
}

/// Builds the yt-dlp command line for one download.
pub fn download_args(url: &str, options: &DownloadOptions) -> Vec<String> {
    let mut args = match options.mode {
        DownloadMode::Audio => vec![
            "-f".to_owned(),
            "bestaudio/best".to_owned(),
            "--extract-audio".to_owned(),
            "--audio-format".to_owned(),
            "mp3".to_owned(),
            "--audio-quality".to_owned(),
            "192K".to_owned(),
        ],
        DownloadMode::Video => vec![
            "-f".to_owned(),
            "bestvideo+bestaudio/best".to_owned(),
            "--merge-output-format".to_owned(),
            "mp4".to_owned(),
        ],
    };

    if let Some(ffmpeg) = &options.ffmpeg_location {
        args.push("--ffmpeg-location".to_owned());
        args.push(ffmpeg.display().to_string());
    }

    args.push("--no-playlist".to_owned());
    args.push("--newline".to_owned());
    args.push("--progress".to_owned());
    args.push("--progress-template".to_owned());
    args.push(format!("download:{PROGRESS_PREFIX}%(progress._percent_str)s"));
    args.push("--print".to_owned());
    args.push(format!("after_move:{SAVED_PREFIX}%(filepath)s"));

    args.push("-o".to_owned());
    args.push(output_template(&options.output_directory));
    args.push(url.to_owned());
    args
}

fn output_template(dir: &Path) -> String {
    dir.join("%(title)s.%(ext)s").display().to_string()
}

/// Subset of the `yt-dlp -J` document we care about
#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
}

pub fn parse_info(json: &[u8]) -> Result<VideoInfo, ExtractionError> {
    let raw: RawInfo = serde_json::from_slice(json)?;
    Ok(VideoInfo {
        title: raw.title.unwrap_or_else(|| "N/A".to_owned()),
        uploader: raw.uploader.unwrap_or_else(|| "N/A".to_owned()),
        duration_secs: raw
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map_or(0, |d| d.round() as u64),
        thumbnail_url: raw.thumbnail,
    })
}
