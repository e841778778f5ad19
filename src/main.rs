//! Desktop front end: download a video URL as MP3 or MP4 through yt-dlp

// Environment-driven settings
mod config;
// Error taxonomy
mod error;
// yt-dlp adapter
mod extraction;
// Data models for requests, task state and events
mod model;
// yt-dlp availability check run before the window opens
mod preflight;
// Progress parsing utilities
mod progress;
// One-time ffmpeg installation
mod provision;
// Single-download session driven by the UI
mod session;
// Download worker state machine
mod task;
// Thumbnail fetching module
mod thumbnail;

#[cfg(test)]
mod testing;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, anyhow};
// eframe/egui for GUI application framework
use eframe::{App, Frame, egui};
use egui::{ColorImage, TextureOptions, Visuals};
// OnceCell for single-time runtime initialization
use once_cell::sync::OnceCell;
// FileDialog for folder selection dialogs
use rfd::FileDialog;
use tokio::{
    runtime::Runtime,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};

use config::AppConfig;
use extraction::YtDlpClient;
use model::{DownloadMode, DownloadRequest, TaskEvent, TaskOutcome, TaskStatus, VideoInfo};
use provision::FfmpegProvisioner;
use session::{Session, SessionEvent};
use task::TaskContext;

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Program entry point: checks for yt-dlp, starts the runtime, launches the GUI
fn main() -> anyhow::Result<()> {
    let dotenv = config::load_environment();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match dotenv {
        Ok(Some(path)) => log::info!("loaded environment from {}", path.display()),
        Ok(None) => log::debug!("no .env file found, using the process environment"),
        Err(e) => log::warn!("could not load .env: {e}"),
    }

    let config = AppConfig::from_env();
    log::debug!("{config:?}");

    if let Err(missing) = preflight::check_runtime(&config.ytdlp_program) {
        log::error!("{missing}");
        eprintln!("Fatal: {missing}");
        eprintln!("Install yt-dlp (https://github.com/yt-dlp/yt-dlp) or point MEDIA_DL_YTDLP at it.");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("media-dl-worker")
        .build()
        .context("failed to start the async runtime")?;
    RUNTIME
        .set(runtime)
        .map_err(|_| anyhow!("runtime initialised twice"))?;
    let runtime = RUNTIME.get().context("runtime missing after initialisation")?;

    let context = TaskContext {
        client: Arc::new(YtDlpClient::new(&config.ytdlp_program)),
        provisioner: Arc::new(
            FfmpegProvisioner::new(config.ffmpeg_archive_url.clone()).probe_version(config.probe_ffmpeg),
        ),
        binaries_dir: config.binaries_dir.clone(),
    };
    let session = Session::new(runtime.handle().clone(), context);

    // Configure the window roughly like a small utility dialog
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([640.0, 520.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Media Downloader",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(Visuals::dark());
            Box::new(DownloaderApp::new(session, &config))
        }),
    )
    .map_err(|e| anyhow!("GUI failed: {e}"))
}

/// Application state for the GUI
struct DownloaderApp {
    session: Session,
    /// Input field for the video URL
    url_input: String,
    /// Destination folder for downloads
    download_folder: String,
    /// MP3 or MP4
    mode: DownloadMode,
    /// Metadata of the last fetched video
    info: Option<VideoInfo>,
    /// Texture for the current thumbnail
    thumbnail: Option<egui::TextureHandle>,
    thumbnail_tx: UnboundedSender<(String, ColorImage)>,
    thumbnail_rx: UnboundedReceiver<(String, ColorImage)>,
    /// Folder of the last finished download
    last_output: Option<PathBuf>,
    /// Lines shown in the log pane
    log_lines: Vec<String>,
}

impl DownloaderApp {
    fn new(session: Session, config: &AppConfig) -> Self {
        let (thumbnail_tx, thumbnail_rx) = unbounded_channel();
        Self {
            session,
            url_input: String::new(),
            download_folder: config.output_dir.display().to_string(),
            mode: DownloadMode::Audio,
            info: None,
            thumbnail: None,
            thumbnail_tx,
            thumbnail_rx,
            last_output: None,
            log_lines: Vec::new(),
        }
    }

    fn log(&mut self, line: impl Into<String>) {
        self.log_lines.push(line.into());
    }

    fn start_download(&mut self) {
        let request = DownloadRequest::new(
            self.url_input.trim(),
            self.mode,
            self.download_folder.trim(),
        );
        let mode = request.mode;
        match self.session.submit(request) {
            Ok(()) => {
                self.last_output = None;
                self.log(format!("Starting {} download...", mode.label()));
            }
            Err(e) => self.log(e.to_string()),
        }
    }

    fn cancel_download(&mut self) {
        if self.session.cancel() {
            self.log("Cancelling download...");
        } else {
            self.log("No active download to cancel.");
        }
    }

    fn fetch_info(&mut self) {
        let url = self.url_input.clone();
        match self.session.fetch_info(&url) {
            Ok(()) => self.log("Fetching video info..."),
            Err(e) => self.log(e.to_string()),
        }
    }

    fn show_info(&mut self, ctx: &egui::Context, info: VideoInfo) {
        self.log(format!(
            "Title: {}\nUploader: {}\nDuration: {} seconds",
            info.title, info.uploader, info.duration_secs
        ));
        let changed = self.info.as_ref().map(|i| &i.thumbnail_url) != Some(&info.thumbnail_url);
        if changed {
            self.thumbnail = None;
            if let (Some(url), Some(runtime)) = (info.thumbnail_url.clone(), RUNTIME.get()) {
                // Spawn thumbnail fetch in blocking task
                let tx = self.thumbnail_tx.clone();
                let ctx = ctx.clone();
                runtime.spawn_blocking(move || {
                    if let Some(img) = thumbnail::fetch_thumbnail(&url) {
                        let _ = tx.send((url, img));
                        ctx.request_repaint();
                    }
                });
            }
        }
        self.info = Some(info);
    }

    fn handle_event(&mut self, ctx: &egui::Context, event: SessionEvent) {
        match event {
            SessionEvent::Info(info) | SessionEvent::Task(TaskEvent::Info(info)) => {
                self.show_info(ctx, info)
            }
            SessionEvent::InfoFailed(message) => self.log(format!("Error fetching info: {message}")),
            SessionEvent::Task(TaskEvent::Status(status)) => match status {
                TaskStatus::FetchingInfo => self.log("Fetching video info..."),
                TaskStatus::Running => self.log("FFmpeg ready, downloading..."),
                _ => {}
            },
            SessionEvent::Task(TaskEvent::Progress(percent)) => {
                self.log(format!("Download progress: {percent:.2}%"))
            }
            SessionEvent::Task(TaskEvent::Finished(outcome)) => {
                if let TaskOutcome::Completed(path) = &outcome {
                    self.last_output = path.parent().map(PathBuf::from);
                }
                self.log(outcome.summary());
            }
        }
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        // Drain worker and info-query events
        for event in self.session.poll() {
            self.handle_event(ctx, event);
        }

        // Handle completed thumbnail fetches
        while let Ok((url, img)) = self.thumbnail_rx.try_recv() {
            let current = self.info.as_ref().and_then(|i| i.thumbnail_url.as_deref());
            if current == Some(url.as_str()) {
                self.thumbnail = Some(ctx.load_texture(url, img, TextureOptions::default()));
            }
        }

        let snapshot = self.session.snapshot().unwrap_or_default();
        let busy = self.session.is_busy();

        // Main panel: inputs, controls, progress, metadata and log
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Media Downloader");

            // URL input field
            ui.label("Enter URL:");
            ui.text_edit_singleline(&mut self.url_input);

            // Format selection
            ui.horizontal(|ui| {
                ui.label("Select Format:");
                ui.radio_value(&mut self.mode, DownloadMode::Audio, DownloadMode::Audio.label());
                ui.radio_value(&mut self.mode, DownloadMode::Video, DownloadMode::Video.label());
            });

            // Folder selection
            ui.horizontal(|ui| {
                ui.label("Save to:");
                ui.text_edit_singleline(&mut self.download_folder);
                if ui.button("Browse…").clicked() {
                    if let Some(folder) = FileDialog::new().set_directory(&self.download_folder).pick_folder() {
                        self.download_folder = folder.display().to_string();
                    }
                }
            });

            // Action buttons
            ui.horizontal(|ui| {
                if ui.add_enabled(!busy, egui::Button::new("Download")).clicked() {
                    self.start_download();
                }
                if ui.button("Cancel Download").clicked() {
                    self.cancel_download();
                }
                let info_idle = self.session.info_status() == TaskStatus::Idle;
                if ui.add_enabled(info_idle, egui::Button::new("Fetch Info")).clicked() {
                    self.fetch_info();
                }
            });

            // Progress and status
            ui.add(egui::ProgressBar::new(snapshot.progress_percent / 100.0).show_percentage());
            ui.horizontal(|ui| {
                ui.label(snapshot.status.label());
                if snapshot.cancel_requested && !snapshot.status.is_terminal() {
                    ui.label("(cancel requested)");
                }
                if let Some(message) = &snapshot.message {
                    ui.label(message);
                }
            });

            // When done, provide a shortcut to the output folder
            if let Some(folder) = &self.last_output {
                if snapshot.status == TaskStatus::Done && ui.button("Open Folder").clicked() {
                    open_folder(folder.clone());
                }
            }

            // Metadata of the current video
            if let Some(info) = &self.info {
                ui.group(|ui| {
                    ui.horizontal(|ui| {
                        if let Some(tex) = &self.thumbnail {
                            ui.add(egui::Image::new(tex).max_width(160.0));
                        }
                        ui.vertical(|ui| {
                            ui.strong(&info.title);
                            ui.label(format!("Uploader: {}", info.uploader));
                            ui.label(format!("Duration: {} seconds", info.duration_secs));
                        });
                    });
                });
            }

            // Log output
            ui.separator();
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for line in &self.log_lines {
                        ui.label(line);
                    }
                });
        });

        // Request periodic repaint for progress updates
        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}

/// Opens the platform file manager on `folder`
fn open_folder(folder: PathBuf) {
    std::thread::spawn(move || {
        #[cfg(target_os = "windows")]
        let opener = "explorer";
        #[cfg(target_os = "macos")]
        let opener = "open";
        #[cfg(all(unix, not(target_os = "macos")))]
        let opener = "xdg-open";

        if let Err(e) = std::process::Command::new(opener).arg(&folder).spawn() {
            log::warn!("could not open {}: {e}", folder.display());
        }
    });
}
