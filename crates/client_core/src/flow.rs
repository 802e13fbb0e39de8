//! The upload → processing → result flow.
//!
//! One [`UploadFlowController`] owns everything the page shows: which section
//! is visible, the status line, the chosen image and its preview, the
//! returned diagram and the toast. Backend calls run as a linear pipeline;
//! any failure lands in a single error path that notifies and returns the
//! flow to the upload step. Polling runs on its own task and is cancelled on
//! every exit path, including dropping the controller.

use std::{
    path::Path,
    sync::{Arc, Weak},
};

use shared::domain::{FlowStep, JobId, JobStatus};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    image::{ImageError, SelectedImage},
    notify::{Notification, Notifier},
    poller::{poll_until_terminal, PollOutcome, PollSettings},
    render::{render_mermaid, RenderedDiagram},
    ApiStage, JobApi, JobApiError, ResultKind,
};

pub const MSG_NOT_AN_IMAGE: &str = "Please upload an image file.";
pub const MSG_UPLOADING: &str = "Uploading image...";
pub const MSG_STARTING: &str = "Initializing intelligence...";
pub const MSG_PNG_UNAVAILABLE: &str = "Server-side PNG not available. Use screenshot for now.";
pub const PNG_STATUS_AVAILABLE: &str = "Available (Download PNG works)";
pub const PNG_STATUS_UNAVAILABLE: &str = "Unavailable (Server missing mermaid-cli)";

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Api(#[from] JobApiError),
    #[error("flow was reset before the job could start")]
    Superseded,
}

#[derive(Debug, Clone)]
pub enum FlowEvent {
    StepChanged(FlowStep),
    StatusText(String),
    FileAccepted { file_name: String },
    Notified(Notification),
    ResultReady { job_id: JobId, png_available: bool },
}

/// Where a download action points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub job_id: JobId,
    pub kind: ResultKind,
    pub url: String,
}

/// Snapshot of everything the flow currently displays.
#[derive(Debug, Clone)]
pub struct FlowView {
    pub step: FlowStep,
    pub status_text: String,
    pub file_name: Option<String>,
    pub preview: Option<String>,
    pub can_submit: bool,
    pub job_id: Option<JobId>,
    pub diagram_source: Option<String>,
    pub rendered: Option<RenderedDiagram>,
    pub png_available: bool,
    /// Server-render status line; set once results have been rendered.
    pub png_status: Option<&'static str>,
    pub polling: bool,
    pub toast: Option<Notification>,
    pub notifications_raised: u64,
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct FlowState {
    step: FlowStep,
    status_text: String,
    selected: Option<SelectedImage>,
    preview: Option<String>,
    current_job_id: Option<JobId>,
    diagram_source: Option<String>,
    rendered: Option<RenderedDiagram>,
    png_available: bool,
    notifier: Notifier,
    poll_task: Option<PollTask>,
    /// Bumped on every submit and reset; late results from an older flow are
    /// dropped when their generation no longer matches.
    generation: u64,
}

impl FlowState {
    fn stop_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.cancel.cancel();
        }
    }
}

pub struct UploadFlowController {
    api: Arc<dyn JobApi>,
    poll_settings: PollSettings,
    inner: Mutex<FlowState>,
    events: broadcast::Sender<FlowEvent>,
    idle: watch::Sender<bool>,
}

impl UploadFlowController {
    pub fn new(api: Arc<dyn JobApi>, poll_settings: PollSettings, notifier: Notifier) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let (idle, _) = watch::channel(true);
        Arc::new(Self {
            api,
            poll_settings,
            inner: Mutex::new(FlowState {
                step: FlowStep::Upload,
                status_text: String::new(),
                selected: None,
                preview: None,
                current_job_id: None,
                diagram_source: None,
                rendered: None,
                png_available: false,
                notifier,
                poll_task: None,
                generation: 0,
            }),
            events,
            idle,
        })
    }

    pub fn api(&self) -> &Arc<dyn JobApi> {
        &self.api
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    /// Resolves once no upload, poll or result fetch is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    pub async fn view(&self) -> FlowView {
        let mut state = self.inner.lock().await;
        let toast = state.notifier.visible().cloned();
        FlowView {
            step: state.step,
            status_text: state.status_text.clone(),
            file_name: state.selected.as_ref().map(|f| f.file_name().to_string()),
            preview: state.preview.clone(),
            can_submit: state.selected.is_some() && state.step == FlowStep::Upload,
            job_id: state.current_job_id.clone(),
            diagram_source: state.diagram_source.clone(),
            rendered: state.rendered.clone(),
            png_available: state.png_available,
            png_status: state.rendered.as_ref().map(|_| {
                if state.png_available {
                    PNG_STATUS_AVAILABLE
                } else {
                    PNG_STATUS_UNAVAILABLE
                }
            }),
            polling: state
                .poll_task
                .as_ref()
                .is_some_and(|task| !task.handle.is_finished()),
            toast,
            notifications_raised: state.notifier.raised(),
        }
    }

    /// Validates and stores a chosen file. A non-image is rejected with a
    /// notification and leaves everything else untouched.
    pub async fn accept_file(
        &self,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<(), FlowError> {
        let result = SelectedImage::new(file_name, mime_type, bytes);
        self.accept(result).await
    }

    pub async fn accept_path(&self, path: &Path) -> Result<(), FlowError> {
        let result = SelectedImage::from_path(path).await;
        self.accept(result).await
    }

    async fn accept(&self, result: Result<SelectedImage, ImageError>) -> Result<(), FlowError> {
        let mut state = self.inner.lock().await;
        let image = match result {
            Ok(image) => image,
            Err(err) => {
                warn!(error = %err, "rejected selected file");
                let message = match &err {
                    ImageError::NotAnImage { .. } => MSG_NOT_AN_IMAGE.to_string(),
                    ImageError::Read { .. } => err.to_string(),
                };
                self.notify(&mut state, message);
                return Err(err.into());
            }
        };

        info!(file = image.file_name(), bytes = image.len(), "image selected");
        state.preview = Some(image.preview_data_uri());
        let file_name = image.file_name().to_string();
        state.selected = Some(image);
        let _ = self.events.send(FlowEvent::FileAccepted { file_name });
        Ok(())
    }

    /// Uploads the selected image, asks the backend to process it and starts
    /// polling. Returns `Ok(None)` without doing anything when no file is
    /// selected. Upload and start failures are also surfaced as a
    /// notification and return the flow to the upload step.
    pub async fn submit(self: &Arc<Self>) -> Result<Option<JobId>, FlowError> {
        let (image, generation) = {
            let mut state = self.inner.lock().await;
            let Some(image) = state.selected.clone() else {
                debug!("submit ignored: no file selected");
                return Ok(None);
            };
            state.stop_polling();
            state.generation += 1;
            state.current_job_id = None;
            state.diagram_source = None;
            state.rendered = None;
            state.png_available = false;
            self.idle.send_replace(false);
            self.set_step(&mut state, FlowStep::Processing);
            self.set_status(&mut state, MSG_UPLOADING);
            (image, state.generation)
        };

        let job_id = match self.api.upload_image(&image).await {
            Ok(job_id) => job_id,
            Err(err) => return Err(self.fail(generation, err).await),
        };

        {
            let mut state = self.inner.lock().await;
            if state.generation != generation {
                return Err(FlowError::Superseded);
            }
            state.current_job_id = Some(job_id.clone());
            self.set_status(&mut state, MSG_STARTING);
        }

        if let Err(err) = self.api.start_processing(&job_id).await {
            return Err(self.fail(generation, err).await);
        }

        let mut state = self.inner.lock().await;
        if state.generation != generation {
            return Err(FlowError::Superseded);
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::run_poll(
            Arc::downgrade(self),
            Arc::clone(&self.api),
            job_id.clone(),
            self.poll_settings,
            cancel.clone(),
            generation,
        ));
        state.poll_task = Some(PollTask { cancel, handle });
        info!(%job_id, "polling started");
        Ok(Some(job_id))
    }

    async fn run_poll(
        controller: Weak<Self>,
        api: Arc<dyn JobApi>,
        job_id: JobId,
        settings: PollSettings,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let status_sink = controller.clone();
        let outcome = poll_until_terminal(api.as_ref(), &job_id, &settings, &cancel, |status| {
            let status_sink = status_sink.clone();
            async move {
                if let Some(controller) = status_sink.upgrade() {
                    controller.record_status(generation, &status).await;
                }
            }
        })
        .await;

        let Some(controller) = controller.upgrade() else {
            return;
        };
        match outcome {
            PollOutcome::Completed(_) => controller.fetch_results(generation, &job_id).await,
            PollOutcome::Failed(raw) => {
                controller
                    .fail_with_message(generation, format!("Processing failed: {raw}"))
                    .await;
            }
            PollOutcome::Error(err) => {
                controller.fail(generation, err).await;
            }
            PollOutcome::TimedOut => {
                let waited = settings.max_duration.unwrap_or_default().as_secs();
                controller
                    .fail_with_message(
                        generation,
                        format!("Processing did not finish within {waited}s"),
                    )
                    .await;
            }
            PollOutcome::Cancelled => debug!(%job_id, "polling cancelled"),
        }
    }

    async fn record_status(&self, generation: u64, status: &JobStatus) {
        let mut state = self.inner.lock().await;
        if state.generation != generation {
            return;
        }
        self.set_status(&mut state, format!("Status: {}...", status.display_label()));
    }

    async fn fetch_results(&self, generation: u64, job_id: &JobId) {
        let source = match self.api.fetch_mermaid(job_id).await {
            Ok(source) => source,
            Err(err) => {
                self.fail(generation, err).await;
                return;
            }
        };

        {
            let mut state = self.inner.lock().await;
            if state.generation != generation {
                return;
            }
            state.diagram_source = Some(source.clone());
        }

        let rendered = match render_mermaid(&source) {
            Ok(rendered) => rendered,
            Err(err) => {
                error!(%job_id, error = %err, "diagram source could not be rendered");
                let mut state = self.inner.lock().await;
                if state.generation == generation {
                    state.poll_task = None;
                    self.notify(&mut state, format!("Could not render results. {err}"));
                    self.idle.send_replace(true);
                }
                return;
            }
        };

        let png_available = self.api.probe_png(job_id).await;

        let mut state = self.inner.lock().await;
        if state.generation != generation {
            return;
        }
        info!(%job_id, kind = %rendered.kind, png_available, "results ready");
        state.poll_task = None;
        state.rendered = Some(rendered);
        state.png_available = png_available;
        self.set_step(&mut state, FlowStep::Result);
        let _ = self.events.send(FlowEvent::ResultReady {
            job_id: job_id.clone(),
            png_available,
        });
        self.idle.send_replace(true);
    }

    async fn fail(&self, generation: u64, err: JobApiError) -> FlowError {
        error!(stage = %err.stage(), error = %err, "job request failed");
        self.fail_with_message(generation, user_message(&err)).await;
        err.into()
    }

    async fn fail_with_message(&self, generation: u64, message: String) {
        let mut state = self.inner.lock().await;
        if state.generation != generation {
            return;
        }
        state.stop_polling();
        self.notify(&mut state, message);
        self.set_step(&mut state, FlowStep::Upload);
        self.idle.send_replace(true);
    }

    /// Back to a clean upload step. The backend job is left alone and the job
    /// id is kept so its results stay downloadable.
    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.stop_polling();
        state.generation += 1;
        state.selected = None;
        state.preview = None;
        state.diagram_source = None;
        state.rendered = None;
        state.png_available = false;
        self.set_step(&mut state, FlowStep::Upload);
        self.idle.send_replace(true);
    }

    /// Stops any running poll without touching the rest of the state.
    pub async fn shutdown(&self) {
        let mut state = self.inner.lock().await;
        state.stop_polling();
        state.generation += 1;
        self.idle.send_replace(true);
    }

    /// Hides the toast with this id. Returns false when it is no longer the
    /// one showing.
    pub async fn dismiss_notification(&self, id: u64) -> bool {
        self.inner.lock().await.notifier.dismiss(id)
    }

    pub async fn download_source(&self) -> Option<DownloadLink> {
        let job_id = self.inner.lock().await.current_job_id.clone()?;
        Some(self.link(job_id, ResultKind::Mermaid))
    }

    /// Re-checks that the PNG exists before handing out its link; notifies
    /// instead when it does not.
    pub async fn download_png(&self) -> Option<DownloadLink> {
        let job_id = self.inner.lock().await.current_job_id.clone()?;
        if self.api.probe_png(&job_id).await {
            return Some(self.link(job_id, ResultKind::Png));
        }
        warn!(%job_id, "png requested but not available");
        let mut state = self.inner.lock().await;
        self.notify(&mut state, MSG_PNG_UNAVAILABLE.to_string());
        None
    }

    fn link(&self, job_id: JobId, kind: ResultKind) -> DownloadLink {
        let url = self.api.result_url(&job_id, kind);
        DownloadLink { job_id, kind, url }
    }

    fn set_step(&self, state: &mut FlowState, step: FlowStep) {
        if state.step != step {
            debug!(from = %state.step, to = %step, "flow step changed");
            state.step = step;
            let _ = self.events.send(FlowEvent::StepChanged(step));
        }
    }

    fn set_status(&self, state: &mut FlowState, text: impl Into<String>) {
        state.status_text = text.into();
        let _ = self
            .events
            .send(FlowEvent::StatusText(state.status_text.clone()));
    }

    fn notify(&self, state: &mut FlowState, message: String) {
        let notification = state.notifier.push(message);
        let _ = self.events.send(FlowEvent::Notified(notification));
    }
}

fn user_message(err: &JobApiError) -> String {
    match err.stage() {
        ApiStage::Upload if matches!(err, JobApiError::MissingJobId) => {
            "Upload response did not include a job id".to_string()
        }
        ApiStage::Upload => "Upload failed".to_string(),
        ApiStage::StartProcessing => "Processing start failed".to_string(),
        ApiStage::Status => "Status check failed".to_string(),
        ApiStage::Mermaid => "Could not render results. Failed to fetch result code".to_string(),
        ApiStage::Png => "Could not download the rendered PNG".to_string(),
    }
}

#[cfg(test)]
#[path = "tests/flow_tests.rs"]
mod tests;
