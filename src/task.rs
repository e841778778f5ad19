//! One download request, run to completion on a tokio worker.
//!
//! The worker is the only writer of the task state. Observers get a
//! [`TaskSnapshot`] through [`TaskHandle::snapshot`] and a stream of
//! [`TaskEvent`]s that always ends with exactly one `Finished`.

use std::{path::PathBuf, sync::Arc};

use tokio::{
    runtime::Handle,
    task::JoinError,
    sync::{
        mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
        watch,
    },
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::TaskError,
    extraction::{DownloadOptions, DownloadOutcome, ExtractionClient},
    model::{DownloadRequest, TaskEvent, TaskOutcome, TaskSnapshot, TaskStatus, VideoInfo},
    progress::ProgressFilter,
    provision::Provisioner,
};

/// Collaborators a download needs, shared between requests.
#[derive(Clone)]
pub struct TaskContext {
    pub client: Arc<dyn ExtractionClient>,
    pub provisioner: Arc<dyn Provisioner>,
    /// Where the ffmpeg binary lives (or will be installed)
    pub binaries_dir: PathBuf,
}

/// Owned by whoever spawned the download.
pub struct TaskHandle {
    state: watch::Receiver<TaskSnapshot>,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn snapshot(&self) -> TaskSnapshot {
        self.state.borrow().clone()
    }

    /// Asks the worker to stop at its next checkpoint. Safe to call any time,
    /// any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Starts `request` on `runtime` and returns its handle and event stream.
pub fn spawn_download(
    runtime: &Handle,
    request: DownloadRequest,
    context: TaskContext,
) -> (TaskHandle, UnboundedReceiver<TaskEvent>) {
    let (events_tx, events_rx) = unbounded_channel();
    let (state_tx, state_rx) = watch::channel(TaskSnapshot::default());
    let cancel = CancellationToken::new();

    let state = Arc::new(state_tx);
    let url = request.url.clone();

    let worker = Worker {
        request,
        context,
        cancel: cancel.clone(),
        state: Arc::clone(&state),
        events: events_tx.clone(),
        progress: ProgressFilter::default(),
    };
    let running = runtime.spawn(worker.run());
    runtime.spawn(async move {
        // A worker that panicked never sent `Finished`; report it here.
        if let Err(e) = running.await {
            let reason = join_failure(e);
            let outcome = TaskOutcome::Failed(TaskError::WorkerLost(reason));
            publish_outcome(&state, &events_tx, &url, outcome);
        }
    });

    let handle = TaskHandle {
        state: state_rx,
        cancel,
    };
    (handle, events_rx)
}

struct Worker {
    request: DownloadRequest,
    context: TaskContext,
    cancel: CancellationToken,
    state: Arc<watch::Sender<TaskSnapshot>>,
    events: UnboundedSender<TaskEvent>,
    progress: ProgressFilter,
}

impl Worker {
    async fn run(mut self) {
        log::info!(
            "starting {} download of {} into {}",
            self.request.mode.label(),
            self.request.url,
            self.request.destination_directory.display()
        );
        let outcome = self.drive().await;
        self.finish(outcome);
    }

    async fn drive(&mut self) -> TaskOutcome {
        let cancel = self.cancel.clone();
        let client = Arc::clone(&self.context.client);
        let provisioner = Arc::clone(&self.context.provisioner);
        let url = self.request.url.clone();

        if cancel.is_cancelled() {
            return self.cancelled();
        }

        self.set_status(TaskStatus::FetchingInfo);
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            info = client.fetch_info(&url) => Some(info),
        };
        let Some(fetched) = fetched else {
            return self.cancelled();
        };
        match fetched {
            Ok(info) => self.publish_info(info),
            Err(e) => return TaskOutcome::Failed(e.into()),
        }

        let binaries_dir = self.context.binaries_dir.clone();
        let provisioned = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            path = provisioner.ensure_binary_present(&binaries_dir) => Some(path),
        };
        let Some(provisioned) = provisioned else {
            return self.cancelled();
        };
        let ffmpeg = match provisioned {
            Ok(path) => path,
            Err(e) => return TaskOutcome::Failed(e.into()),
        };
        if cancel.is_cancelled() {
            return self.cancelled();
        }

        self.set_status(TaskStatus::Running);
        let options = DownloadOptions {
            mode: self.request.mode,
            output_directory: self.request.destination_directory.clone(),
            ffmpeg_location: Some(ffmpeg),
        };
        let (progress_tx, mut progress_rx) = unbounded_channel();
        let download = client.run_download(&url, &options, progress_tx, cancel.clone());
        tokio::pin!(download);

        let result = loop {
            tokio::select! {
                result = &mut download => break result,
                Some(percent) = progress_rx.recv() => self.publish_progress(percent),
                _ = cancel.cancelled(), if !self.cancel_requested() => self.mark_cancel_requested(),
            }
        };
        while let Ok(percent) = progress_rx.try_recv() {
            self.publish_progress(percent);
        }

        match result {
            Ok(DownloadOutcome::Completed(path)) if cancel.is_cancelled() => {
                log::info!("{} finished after cancel was requested", path.display());
                self.cancelled()
            }
            Ok(DownloadOutcome::Completed(path)) => {
                self.publish_progress(100.0);
                TaskOutcome::Completed(path)
            }
            Ok(DownloadOutcome::Cancelled) => self.cancelled(),
            Err(e) => TaskOutcome::Failed(e.into()),
        }
    }

    fn cancel_requested(&self) -> bool {
        self.state.borrow().cancel_requested
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.state.send_modify(|s| s.status = status);
        let _ = self.events.send(TaskEvent::Status(status));
    }

    fn publish_info(&mut self, info: VideoInfo) {
        log::info!("video info: {:?} by {:?} ({}s)", info.title, info.uploader, info.duration_secs);
        self.state.send_modify(|s| s.info = Some(info.clone()));
        let _ = self.events.send(TaskEvent::Info(info));
    }

    fn publish_progress(&mut self, percent: f32) {
        if let Some(percent) = self.progress.accept(percent) {
            self.state.send_modify(|s| s.progress_percent = percent);
            let _ = self.events.send(TaskEvent::Progress(percent));
        }
    }

    fn mark_cancel_requested(&mut self) {
        if self.cancel_requested() {
            return;
        }
        log::info!("cancel requested for {}", self.request.url);
        let running = self.state.borrow().status == TaskStatus::Running;
        self.state.send_modify(|s| s.cancel_requested = true);
        if running {
            self.set_status(TaskStatus::Cancelling);
        }
    }

    fn cancelled(&mut self) -> TaskOutcome {
        self.mark_cancel_requested();
        TaskOutcome::Cancelled
    }

    fn finish(self, outcome: TaskOutcome) {
        publish_outcome(&self.state, &self.events, &self.request.url, outcome);
    }
}

/// Moves the task into its terminal state and sends the single `Finished`.
fn publish_outcome(
    state: &watch::Sender<TaskSnapshot>,
    events: &UnboundedSender<TaskEvent>,
    url: &str,
    outcome: TaskOutcome,
) {
    let status = outcome.status();
    let message = outcome.summary();
    match &outcome {
        TaskOutcome::Failed(_) => log::error!("{message} ({url})"),
        TaskOutcome::Cancelled => log::warn!("{message} ({url})"),
        TaskOutcome::Completed(_) => log::info!("{message}"),
    }
    state.send_modify(|s| {
        s.status = status;
        s.message = Some(message);
    });
    let _ = events.send(TaskEvent::Status(status));
    let _ = events.send(TaskEvent::Finished(outcome));
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return "download worker was aborted".to_owned();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || "download worker panicked".to_owned(),
            |msg| format!("download worker panicked: {msg}"),
        )
}
