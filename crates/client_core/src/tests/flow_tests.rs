use std::{sync::Arc, time::Duration};

use reqwest::StatusCode;
use shared::domain::{FlowStep, JobId};

use super::*;
use crate::test_support::{ScriptedApi, UploadBehavior, JOB};

const TICK: Duration = Duration::from_millis(10);

fn controller_with(api: Arc<ScriptedApi>) -> Arc<UploadFlowController> {
    controller_with_settings(
        api,
        PollSettings {
            interval: TICK,
            max_duration: None,
        },
    )
}

fn controller_with_settings(
    api: Arc<ScriptedApi>,
    settings: PollSettings,
) -> Arc<UploadFlowController> {
    UploadFlowController::new(api, settings, Notifier::default())
}

async fn select_png(controller: &UploadFlowController) {
    controller
        .accept_file("sketch.png", "image/png", b"fake-png".to_vec())
        .await
        .expect("png accepted");
}

async fn settle(controller: &UploadFlowController) {
    tokio::time::timeout(Duration::from_secs(5), controller.wait_idle())
        .await
        .expect("flow settles");
}

#[tokio::test]
async fn non_image_file_is_rejected_with_one_notification() {
    let api = Arc::new(ScriptedApi::endless());
    let controller = controller_with(api.clone());

    let err = controller
        .accept_file("notes.txt", "text/plain", b"hello".to_vec())
        .await
        .expect_err("text rejected");
    assert!(matches!(err, FlowError::Image(ImageError::NotAnImage { .. })));

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert_eq!(view.notifications_raised, 1);
    assert_eq!(
        view.toast.map(|t| t.message).as_deref(),
        Some(MSG_NOT_AN_IMAGE)
    );
    assert!(view.file_name.is_none());
    assert!(view.preview.is_none());
    assert!(!view.can_submit);
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn rejected_file_keeps_the_earlier_selection() {
    let api = Arc::new(ScriptedApi::endless());
    let controller = controller_with(api.clone());
    select_png(&controller).await;
    let before = controller.view().await;

    controller
        .accept_file("report.pdf", "application/pdf", b"%PDF".to_vec())
        .await
        .expect_err("pdf rejected");

    let view = controller.view().await;
    assert_eq!(view.file_name.as_deref(), Some("sketch.png"));
    assert_eq!(view.preview, before.preview);
    assert!(view.can_submit);
    assert_eq!(view.step, FlowStep::Upload);
    assert_eq!(view.notifications_raised, 1);
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn dismissing_the_toast_hides_it() {
    let controller = controller_with(Arc::new(ScriptedApi::endless()));
    controller
        .accept_file("notes.txt", "text/plain", b"hello".to_vec())
        .await
        .expect_err("text rejected");
    let toast = controller.view().await.toast.expect("toast shown");

    assert!(!controller.dismiss_notification(toast.id + 1).await);
    assert!(controller.view().await.toast.is_some());

    assert!(controller.dismiss_notification(toast.id).await);
    let view = controller.view().await;
    assert!(view.toast.is_none());
    assert_eq!(view.notifications_raised, 1);
    assert!(!controller.dismiss_notification(toast.id).await);
}

#[tokio::test]
async fn image_file_fills_preview_and_enables_submit() {
    let controller = controller_with(Arc::new(ScriptedApi::endless()));
    select_png(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.file_name.as_deref(), Some("sketch.png"));
    let expected = SelectedImage::new("sketch.png", "image/png", b"fake-png".to_vec())
        .expect("png")
        .preview_data_uri();
    assert_eq!(view.preview.as_deref(), Some(expected.as_str()));
    assert!(view.can_submit);
    assert_eq!(view.notifications_raised, 0);
}

#[tokio::test]
async fn submit_without_file_does_nothing() {
    let api = Arc::new(ScriptedApi::endless());
    let controller = controller_with(api.clone());

    let started = controller.submit().await.expect("no-op");
    assert!(started.is_none());
    assert_eq!(controller.view().await.step, FlowStep::Upload);
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn upload_without_job_id_never_polls() {
    let api = Arc::new(ScriptedApi::endless().with_upload(UploadBehavior::MissingId));
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    let err = controller.submit().await.expect_err("missing id");
    assert!(matches!(err, FlowError::Api(JobApiError::MissingJobId)));
    tokio::time::sleep(TICK * 3).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert!(!view.polling);
    assert_eq!(view.notifications_raised, 1);
    assert_eq!(api.calls().await, vec!["upload:sketch.png".to_string()]);
}

#[tokio::test]
async fn upload_http_error_returns_to_upload() {
    let api = Arc::new(
        ScriptedApi::endless().with_upload(UploadBehavior::HttpError(StatusCode::BAD_REQUEST)),
    );
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    controller.submit().await.expect_err("upload fails");

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert_eq!(view.toast.map(|t| t.message).as_deref(), Some("Upload failed"));
    assert_eq!(api.count("start:").await, 0);
}

#[tokio::test]
async fn start_processing_failure_returns_to_upload() {
    let api = Arc::new(ScriptedApi::endless().with_start_ok(false));
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    controller.submit().await.expect_err("start fails");
    tokio::time::sleep(TICK * 3).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert_eq!(view.job_id, Some(JobId::new(JOB)));
    assert_eq!(
        view.toast.map(|t| t.message).as_deref(),
        Some("Processing start failed")
    );
    assert_eq!(api.count("status:").await, 0);
}

#[tokio::test]
async fn queued_rendering_completed_fetches_results_once() {
    let api = Arc::new(ScriptedApi::completing(&["queued", "rendering", "completed"]));
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    let job_id = controller.submit().await.expect("submit");
    assert_eq!(job_id, Some(JobId::new(JOB)));
    settle(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Result);
    assert_eq!(api.count("status:").await, 3);
    assert_eq!(api.count("mermaid:").await, 1);
    assert!(view.png_available);
    assert_eq!(view.png_status, Some(PNG_STATUS_AVAILABLE));
    assert!(!view.polling);
    assert_eq!(view.status_text, "Status: completed...");
    assert_eq!(view.rendered.map(|r| r.kind).as_deref(), Some("flowchart"));
    assert!(view
        .diagram_source
        .as_deref()
        .is_some_and(|s| s.starts_with("flowchart TD")));
    assert_eq!(view.notifications_raised, 0);

    tokio::time::sleep(TICK * 5).await;
    assert_eq!(api.count("status:").await, 3, "polling must stop on completion");
}

#[tokio::test]
async fn completed_with_warnings_counts_as_success() {
    let api = Arc::new(ScriptedApi::completing(&["completed_with_warnings"]));
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    controller.submit().await.expect("submit");
    settle(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Result);
    assert_eq!(view.status_text, "Status: completed with_warnings...");
}

#[tokio::test]
async fn queued_failed_timeout_notifies_without_results_fetch() {
    let api = Arc::new(ScriptedApi::completing(&["queued", "failed_timeout"]));
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    controller.submit().await.expect("submit");
    settle(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert_eq!(
        view.toast.map(|t| t.message).as_deref(),
        Some("Processing failed: failed_timeout")
    );
    assert_eq!(api.count("mermaid:").await, 0);
    assert_eq!(api.count("status:").await, 2);
}

#[tokio::test]
async fn status_request_error_stops_polling() {
    let api = Arc::new(
        ScriptedApi::endless()
            .with_status_error_after(&["queued"], StatusCode::INTERNAL_SERVER_ERROR),
    );
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    controller.submit().await.expect("submit");
    settle(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert_eq!(
        view.toast.map(|t| t.message).as_deref(),
        Some("Status check failed")
    );
    tokio::time::sleep(TICK * 5).await;
    assert_eq!(api.count("status:").await, 2);
}

#[tokio::test]
async fn png_unavailable_disables_png_download() {
    let api = Arc::new(ScriptedApi::completing(&["completed"]).with_png(false));
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    controller.submit().await.expect("submit");
    settle(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Result);
    assert!(!view.png_available);
    assert_eq!(view.png_status, Some(PNG_STATUS_UNAVAILABLE));
    assert_eq!(view.notifications_raised, 0);

    assert!(controller.download_png().await.is_none());
    let view = controller.view().await;
    assert_eq!(
        view.toast.map(|t| t.message).as_deref(),
        Some(MSG_PNG_UNAVAILABLE)
    );
}

#[tokio::test]
async fn download_links_point_at_result_endpoints() {
    let controller = controller_with(Arc::new(ScriptedApi::completing(&["completed"])));
    assert!(controller.download_source().await.is_none());
    select_png(&controller).await;
    controller.submit().await.expect("submit");
    settle(&controller).await;

    let source = controller.download_source().await.expect("source link");
    assert_eq!(source.url, format!("mock://results/{JOB}/mermaid"));
    let png = controller.download_png().await.expect("png link");
    assert_eq!(png.kind, ResultKind::Png);
    assert_eq!(png.url, format!("mock://results/{JOB}/png"));
}

#[tokio::test]
async fn malformed_diagram_notifies_without_changing_step() {
    let api = Arc::new(
        ScriptedApi::completing(&["completed"]).with_mermaid(Ok("<html>500</html>".into())),
    );
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    controller.submit().await.expect("submit");
    settle(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Processing);
    assert!(view.rendered.is_none());
    assert!(view.png_status.is_none());
    assert_eq!(view.diagram_source.as_deref(), Some("<html>500</html>"));
    assert!(view
        .toast
        .is_some_and(|t| t.message.starts_with("Could not render results.")));
    assert_eq!(api.count("probe_png:").await, 0);
}

#[tokio::test]
async fn mermaid_fetch_error_returns_to_upload() {
    let api = Arc::new(
        ScriptedApi::completing(&["completed"]).with_mermaid(Err(StatusCode::NOT_FOUND)),
    );
    let controller = controller_with(api);
    select_png(&controller).await;

    controller.submit().await.expect("submit");
    settle(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert!(view
        .toast
        .is_some_and(|t| t.message.contains("Failed to fetch result code")));
}

#[tokio::test]
async fn reset_from_result_clears_state_without_backend_calls() {
    let api = Arc::new(ScriptedApi::completing(&["completed"]));
    let controller = controller_with(api.clone());
    select_png(&controller).await;
    controller.submit().await.expect("submit");
    settle(&controller).await;
    assert_eq!(controller.view().await.step, FlowStep::Result);

    let calls_before = api.calls().await.len();
    controller.reset().await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert!(view.file_name.is_none());
    assert!(view.preview.is_none());
    assert!(view.diagram_source.is_none());
    assert!(view.rendered.is_none());
    assert!(!view.png_available);
    assert!(!view.can_submit);
    assert_eq!(view.job_id, Some(JobId::new(JOB)));
    assert_eq!(api.calls().await.len(), calls_before);
}

#[tokio::test]
async fn reset_while_polling_stops_the_poll_task() {
    let api = Arc::new(ScriptedApi::endless());
    let controller = controller_with(api.clone());
    select_png(&controller).await;
    controller.submit().await.expect("submit");
    tokio::time::sleep(TICK * 4).await;
    assert!(controller.view().await.polling);

    controller.reset().await;
    tokio::time::sleep(TICK * 2).await;
    let polled = api.count("status:").await;
    tokio::time::sleep(TICK * 6).await;

    assert_eq!(api.count("status:").await, polled);
    assert!(!controller.view().await.polling);
}

#[tokio::test]
async fn dropping_the_controller_stops_polling() {
    let api = Arc::new(ScriptedApi::endless());
    let controller = controller_with(api.clone());
    select_png(&controller).await;
    controller.submit().await.expect("submit");
    tokio::time::sleep(TICK * 3).await;

    drop(controller);
    tokio::time::sleep(TICK * 2).await;
    let polled = api.count("status:").await;
    tokio::time::sleep(TICK * 6).await;

    assert_eq!(api.count("status:").await, polled);
}

#[tokio::test]
async fn poll_deadline_returns_to_upload() {
    let api = Arc::new(ScriptedApi::endless());
    let controller = controller_with_settings(
        api.clone(),
        PollSettings {
            interval: TICK,
            max_duration: Some(Duration::from_millis(60)),
        },
    );
    select_png(&controller).await;

    controller.submit().await.expect("submit");
    settle(&controller).await;

    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Upload);
    assert!(view
        .toast
        .is_some_and(|t| t.message.starts_with("Processing did not finish")));
    assert_eq!(api.count("mermaid:").await, 0);
}

#[tokio::test]
async fn resubmitting_replaces_the_previous_poll() {
    let api = Arc::new(ScriptedApi::endless());
    let controller = controller_with(api.clone());
    select_png(&controller).await;

    controller.submit().await.expect("first submit");
    tokio::time::sleep(TICK * 3).await;
    controller.submit().await.expect("second submit");
    tokio::time::sleep(TICK * 3).await;

    assert_eq!(api.count("upload:").await, 2);
    let view = controller.view().await;
    assert_eq!(view.step, FlowStep::Processing);
    assert!(view.polling);
    controller.shutdown().await;
}

#[tokio::test]
async fn events_follow_the_flow() {
    let controller = controller_with(Arc::new(ScriptedApi::completing(&["queued", "completed"])));
    let mut events = controller.subscribe();
    select_png(&controller).await;
    controller.submit().await.expect("submit");
    settle(&controller).await;

    let mut steps = Vec::new();
    let mut ready = false;
    while let Ok(event) = events.try_recv() {
        match event {
            FlowEvent::StepChanged(step) => steps.push(step),
            FlowEvent::ResultReady { png_available, .. } => ready = png_available,
            _ => {}
        }
    }
    assert_eq!(steps, vec![FlowStep::Processing, FlowStep::Result]);
    assert!(ready);
}
