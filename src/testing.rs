//! Scripted stand-ins for yt-dlp, ffmpeg provisioning and the network.

use std::{
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc::UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ExtractionError, ProvisionError},
    extraction::{DownloadOptions, DownloadOutcome, ExtractionClient},
    model::VideoInfo,
    provision::{ArchiveFetcher, Provisioner},
};

/// Builds an in-memory zip archive from `(path, contents)` pairs.
pub fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[derive(Clone)]
pub struct CountingFetcher {
    response: Result<Vec<u8>, reqwest::StatusCode>,
    calls: Arc<AtomicUsize>,
}

impl CountingFetcher {
    pub fn serving(archive: Vec<u8>) -> Self {
        Self {
            response: Ok(archive),
            calls: Arc::default(),
        }
    }

    pub fn failing(status: reqwest::StatusCode) -> Self {
        Self {
            response: Err(status),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone().map_err(ProvisionError::Http)
    }
}

/// Provisioner that either "installs" instantly or fails like a dead network.
#[derive(Clone, Default)]
pub struct FakeProvisioner {
    failure: Option<reqwest::StatusCode>,
    /// When set, installs block until notified.
    gate: Option<Arc<Notify>>,
    calls: Arc<AtomicUsize>,
}

impl FakeProvisioner {
    pub fn offline() -> Self {
        Self {
            failure: Some(reqwest::StatusCode::BAD_GATEWAY),
            ..Self::default()
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn ensure_binary_present(&self, target_directory: &Path) -> Result<PathBuf, ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.failure {
            Some(status) => Err(ProvisionError::Http(status)),
            None => Ok(target_directory.join("ffmpeg")),
        }
    }
}

/// How the fake download behaves once started
#[derive(Clone, Debug)]
pub enum Script {
    /// Send the progress values, write `<title>.<ext>` and complete.
    Complete(Vec<f32>),
    /// Send the progress values, then wait for cancellation.
    WaitForCancel(Vec<f32>),
    /// Wait for cancellation but finish the file anyway.
    CompleteDespiteCancel,
    /// Fail with the given yt-dlp message.
    Fail(String),
    /// A buggy adapter: panics instead of returning.
    Panic(&'static str),
}

#[derive(Clone)]
pub struct FakeClient {
    info: Result<VideoInfo, String>,
    script: Script,
    /// When set, `fetch_info` blocks until notified.
    info_gate: Option<Arc<Notify>>,
    downloads: Arc<AtomicUsize>,
}

impl FakeClient {
    pub fn new(title: &str, script: Script) -> Self {
        Self {
            info: Ok(sample_info(title)),
            script,
            info_gate: None,
            downloads: Arc::default(),
        }
    }

    pub fn info_fails(message: &str) -> Self {
        Self {
            info: Err(message.to_owned()),
            ..Self::new("unused", Script::Complete(Vec::new()))
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.info_gate = Some(gate);
        self
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    async fn write_output(&self, options: &DownloadOptions) -> Result<PathBuf, ExtractionError> {
        let title = self.info.as_ref().map(|i| i.title.clone()).unwrap_or_default();
        let path = options
            .output_directory
            .join(format!("{title}.{}", options.mode.extension()));
        tokio::fs::create_dir_all(&options.output_directory).await?;
        tokio::fs::write(&path, b"media").await?;
        Ok(path)
    }
}

pub fn sample_info(title: &str) -> VideoInfo {
    VideoInfo {
        title: title.to_owned(),
        uploader: "Uploader".to_owned(),
        duration_secs: 42,
        thumbnail_url: None,
    }
}

#[async_trait]
impl ExtractionClient for FakeClient {
    async fn fetch_info(&self, _url: &str) -> Result<VideoInfo, ExtractionError> {
        if let Some(gate) = &self.info_gate {
            gate.notified().await;
        }
        self.info.clone().map_err(ExtractionError::Failed)
    }

    async fn run_download(
        &self,
        _url: &str,
        options: &DownloadOptions,
        progress: UnboundedSender<f32>,
        cancel: CancellationToken,
    ) -> Result<DownloadOutcome, ExtractionError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Complete(steps) => {
                for step in steps {
                    let _ = progress.send(*step);
                    tokio::task::yield_now().await;
                }
                Ok(DownloadOutcome::Completed(self.write_output(options).await?))
            }
            Script::WaitForCancel(steps) => {
                for step in steps {
                    let _ = progress.send(*step);
                }
                cancel.cancelled().await;
                Ok(DownloadOutcome::Cancelled)
            }
            Script::CompleteDespiteCancel => {
                cancel.cancelled().await;
                Ok(DownloadOutcome::Completed(self.write_output(options).await?))
            }
            Script::Fail(message) => Err(ExtractionError::Failed(message.clone())),
            Script::Panic(message) => panic!("{message}"),
        }
    }
}
