use std::sync::Arc;

use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{UnboundedReceiver, error::TryRecvError},
        oneshot,
    },
};

use crate::{
    error::ExtractionError,
    model::{DownloadRequest, TaskEvent, TaskSnapshot, TaskStatus, VideoInfo},
    task::{TaskContext, TaskHandle, spawn_download},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Please enter a valid URL.")]
    EmptyUrl,
    #[error("A download is already running.")]
    Busy,
    #[error("Video info is already being fetched.")]
    InfoPending,
}

/// Everything the UI needs to react to, in arrival order
#[derive(Debug)]
pub enum SessionEvent {
    Task(TaskEvent),
    Info(VideoInfo),
    InfoFailed(String),
}

struct ActiveDownload {
    handle: TaskHandle,
    events: UnboundedReceiver<TaskEvent>,
    finished: bool,
}

/// Toolkit-free front of the downloader: at most one download at a time,
/// plus standalone metadata queries. Polled from the UI thread.
pub struct Session {
    runtime: Handle,
    context: TaskContext,
    active: Option<ActiveDownload>,
    info: Option<oneshot::Receiver<Result<VideoInfo, ExtractionError>>>,
}

impl Session {
    pub fn new(runtime: Handle, context: TaskContext) -> Self {
        Self {
            runtime,
            context,
            active: None,
            info: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.finished)
    }

    pub fn submit(&mut self, request: DownloadRequest) -> Result<(), SessionError> {
        if request.url.trim().is_empty() {
            return Err(SessionError::EmptyUrl);
        }
        if self.is_busy() {
            log::warn!("rejected {}: another download is running", request.url);
            return Err(SessionError::Busy);
        }
        let (handle, events) = spawn_download(&self.runtime, request, self.context.clone());
        self.active = Some(ActiveDownload {
            handle,
            events,
            finished: false,
        });
        Ok(())
    }

    /// Returns false when there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        match &self.active {
            Some(active) if !active.finished => {
                active.handle.cancel();
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the current (or last) download.
    pub fn snapshot(&self) -> Option<TaskSnapshot> {
        self.active.as_ref().map(|a| a.handle.snapshot())
    }

    /// Status of the standalone metadata query.
    pub fn info_status(&self) -> TaskStatus {
        if self.info.is_some() {
            TaskStatus::FetchingInfo
        } else {
            TaskStatus::Idle
        }
    }

    pub fn fetch_info(&mut self, url: &str) -> Result<(), SessionError> {
        let url = url.trim().to_owned();
        if url.is_empty() {
            return Err(SessionError::EmptyUrl);
        }
        if self.info.is_some() {
            return Err(SessionError::InfoPending);
        }
        let (tx, rx) = oneshot::channel();
        let client = Arc::clone(&self.context.client);
        self.runtime.spawn(async move {
            let _ = tx.send(client.fetch_info(&url).await);
        });
        self.info = Some(rx);
        Ok(())
    }

    /// Drains everything that arrived since the last call. Never blocks.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        if let Some(active) = self.active.as_mut() {
            loop {
                match active.events.try_recv() {
                    Ok(event) => {
                        if matches!(event, TaskEvent::Finished(_)) {
                            active.finished = true;
                        }
                        out.push(SessionEvent::Task(event));
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if !active.finished {
                            log::error!("download worker stopped without a result");
                            active.finished = true;
                        }
                        break;
                    }
                }
            }
        }

        if let Some(rx) = self.info.as_mut() {
            match rx.try_recv() {
                Ok(Ok(info)) => {
                    self.info = None;
                    out.push(SessionEvent::Info(info));
                }
                Ok(Err(e)) => {
                    self.info = None;
                    out.push(SessionEvent::InfoFailed(e.to_string()));
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.info = None;
                    out.push(SessionEvent::InfoFailed("info query was interrupted".to_owned()));
                }
            }
        }
        out
    }
}
