//! Integration tests: the full pipeline against a local mock endpoint.
//!
//! Each test starts its own axum server on an ephemeral port, so they run in
//! parallel without coordination and need no API key or network access.

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{closed_endpoint, test_image, MockVisionServer, SUCCESS_BODY};
use edgequake_vision::{
    build_request, describe, describe_image, encode, to_transport_text, ClassifiedResult,
    CpuBackend, ImageFormat, PixelBuffer, RasterSurface, RenderBackend, Stage, TargetId,
    VisionClient, VisionConfig, VisionError, VisionProgressCallback, DEFAULT_MODEL,
};
use edgequake_vision::error::BackendError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config_for(url: &str) -> VisionConfig {
    VisionConfig::builder()
        .endpoint(url)
        .api_key("sk-test")
        .prompt("What is in this image?")
        .max_tokens(64)
        .build()
        .expect("valid config")
}

#[tokio::test]
async fn success_round_trip_through_mock_server() {
    let mut server = MockVisionServer::start(200, SUCCESS_BODY).await;
    let img = test_image();

    let output = describe_image(RasterSurface::Decoded(img.clone()), &config_for(&server.url))
        .await
        .expect("local stages succeed");

    assert_eq!(
        output.result,
        ClassifiedResult::Success {
            text: "A cat on a mat.".into(),
            finish_reason: Some("stop".into()),
        }
    );
    assert_eq!((output.stats.width, output.stats.height), (9, 5));
    assert_eq!(output.stats.input_tokens, Some(120));
    assert_eq!(output.stats.output_tokens, Some(6));
    assert!(output.stats.request_bytes > output.stats.encoded_bytes);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(req.content_type.as_deref(), Some("application/json"));
    assert_eq!(req.body["model"], DEFAULT_MODEL);
    assert_eq!(req.body["max_tokens"], 64);

    let parts = req.body["messages"][0]["content"].as_array().unwrap();
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[0]["text"], "What is in this image?");
    assert_eq!(parts[1]["type"], "image_url");

    // The image the server received decodes to exactly our pixels.
    let url = parts[1]["image_url"]["url"].as_str().unwrap();
    let b64 = url
        .strip_prefix("data:image/png;base64,")
        .expect("png data uri");
    let png = STANDARD.decode(b64).unwrap();
    let received = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(received, img);

    server.stop().await;
}

#[tokio::test]
async fn api_error_with_401() {
    let body = r#"{"error":{"message":"Invalid API key","type":"invalid_request_error","code":"invalid_api_key"}}"#;
    let server = MockVisionServer::start(401, body).await;

    let output = describe_image(RasterSurface::Decoded(test_image()), &config_for(&server.url))
        .await
        .unwrap();

    match output.result {
        ClassifiedResult::ApiError { detail, status } => {
            assert_eq!(status, Some(401));
            assert_eq!(detail.message, "Invalid API key");
            assert_eq!(detail.kind.as_deref(), Some("invalid_request_error"));
            assert_eq!(detail.code.as_deref(), Some("invalid_api_key"));
        }
        other => panic!("expected ApiError, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_without_detail_is_sent_once() {
    let server = MockVisionServer::start(500, "{}").await;

    let output = describe_image(RasterSurface::Decoded(test_image()), &config_for(&server.url))
        .await
        .unwrap();

    assert_eq!(
        output.result,
        ClassifiedResult::TransportError {
            status: Some(500),
            body: "{}".into(),
        }
    );
    // No retry.
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn non_json_success_body_is_parse_error() {
    let server = MockVisionServer::start(200, "<html>gateway</html>").await;

    let output = describe_image(RasterSurface::Decoded(test_image()), &config_for(&server.url))
        .await
        .unwrap();

    match output.result {
        ClassifiedResult::ParseError { body, .. } => assert_eq!(body, "<html>gateway</html>"),
        other => panic!("expected ParseError, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_is_transport_error() {
    let server =
        MockVisionServer::start_with_delay(200, SUCCESS_BODY, Duration::from_secs(5)).await;
    let client = VisionClient::new(&server.url, "sk-test", Duration::from_millis(200)).unwrap();

    let pixels = PixelBuffer::zeroed(2, 2).unwrap();
    let text = to_transport_text(&encode(&pixels, ImageFormat::Lossless).unwrap());
    let request = build_request("", &text, 16, "m").unwrap();

    match client.send(&request).await {
        ClassifiedResult::TransportError { status, body } => {
            assert_eq!(status, None);
            assert!(body.contains("timed out"), "got: {body}");
        }
        other => panic!("expected TransportError, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_refused_is_transport_error() {
    let output = describe_image(
        RasterSurface::Decoded(test_image()),
        &config_for(&closed_endpoint()),
    )
    .await
    .unwrap();

    assert!(matches!(
        output.result,
        ClassifiedResult::TransportError { status: None, .. }
    ));
}

#[tokio::test]
async fn missing_surface_sends_nothing() {
    let server = MockVisionServer::start(200, SUCCESS_BODY).await;
    let backend = Arc::new(CpuBackend::default());

    let err = describe(Arc::clone(&backend), None, &config_for(&server.url))
        .await
        .unwrap_err();

    assert!(matches!(err, VisionError::SurfaceUnavailable));
    assert_eq!(backend.acquired_total(), 0);
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn corrupt_surface_aborts_before_network() {
    let server = MockVisionServer::start(200, SUCCESS_BODY).await;
    let backend = Arc::new(CpuBackend::default());
    let surface = RasterSurface::Compressed {
        bytes: Arc::from(&b"\x89PNG but truncated"[..]),
        width: 4,
        height: 4,
    };

    let err = describe(Arc::clone(&backend), Some(Arc::new(surface)), &config_for(&server.url))
        .await
        .unwrap_err();

    assert!(matches!(err, VisionError::ReadbackFailure { .. }));
    assert_eq!(backend.live_targets(), 0);
    assert_eq!(backend.released_total(), 1);
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn cancelled_call_leaves_no_targets() {
    let server =
        MockVisionServer::start_with_delay(200, SUCCESS_BODY, Duration::from_secs(5)).await;
    let backend = Arc::new(CpuBackend::default());
    let config = config_for(&server.url);

    let fut = describe(
        Arc::clone(&backend),
        Some(Arc::new(RasterSurface::Decoded(test_image()))),
        &config,
    );
    let outcome = tokio::time::timeout(Duration::from_millis(300), fut).await;

    assert!(outcome.is_err(), "call should have been abandoned");
    assert_eq!(backend.live_targets(), 0);
    assert_eq!(backend.acquired_total(), backend.released_total());
}

/// Software backend whose rasterisation takes a fixed time.
struct SlowBackend {
    inner: CpuBackend,
    delay: Duration,
}

impl RenderBackend for SlowBackend {
    type Source = RasterSurface;

    fn acquire_target(&self, width: u32, height: u32) -> Result<TargetId, BackendError> {
        self.inner.acquire_target(width, height)
    }

    fn release_target(&self, target: TargetId) {
        self.inner.release_target(target)
    }

    fn active_read_target(&self) -> Option<TargetId> {
        self.inner.active_read_target()
    }

    fn set_active_read_target(&self, target: Option<TargetId>) {
        self.inner.set_active_read_target(target)
    }

    fn rasterize(&self, source: &RasterSurface, target: TargetId) -> Result<(), BackendError> {
        std::thread::sleep(self.delay);
        self.inner.rasterize(source, target)
    }

    fn read_pixels(&self, out: &mut PixelBuffer) -> Result<(), BackendError> {
        self.inner.read_pixels(out)
    }
}

#[tokio::test]
async fn cancelled_during_readback_still_releases_target() {
    let server = MockVisionServer::start(200, SUCCESS_BODY).await;
    let backend = Arc::new(SlowBackend {
        inner: CpuBackend::default(),
        delay: Duration::from_millis(400),
    });
    let host_target = backend.acquire_target(1, 1).unwrap();
    backend.set_active_read_target(Some(host_target));
    let config = config_for(&server.url);

    let fut = describe(
        Arc::clone(&backend),
        Some(Arc::new(RasterSurface::Decoded(test_image()))),
        &config,
    );
    let outcome = tokio::time::timeout(Duration::from_millis(50), fut).await;
    assert!(outcome.is_err(), "call should have been abandoned mid-readback");

    // The blocking readback keeps running after cancellation; wait for it.
    for _ in 0..100 {
        if backend.inner.released_total() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(backend.inner.acquired_total(), 2);
    assert_eq!(backend.inner.released_total(), 1);
    // Only the host's own target is still alive.
    assert_eq!(backend.inner.live_targets(), 1);
    assert_eq!(backend.active_read_target(), Some(host_target));
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn concurrent_calls_share_one_backend() {
    let server = MockVisionServer::start(200, SUCCESS_BODY).await;
    let backend = Arc::new(CpuBackend::default());
    let config = config_for(&server.url);

    let calls = (0..8).map(|i| {
        let surface = RasterSurface::Decoded(image::RgbaImage::from_pixel(
            3 + i,
            2,
            image::Rgba([i as u8, 0, 0, 255]),
        ));
        describe(Arc::clone(&backend), Some(Arc::new(surface)), &config)
    });
    let outputs = futures::future::join_all(calls).await;

    for out in outputs {
        assert!(out.unwrap().result.is_success());
    }
    assert_eq!(server.requests().len(), 8);
    assert_eq!(backend.live_targets(), 0);
    assert_eq!(backend.active_read_target(), None);
}

#[tokio::test]
async fn jpeg_format_is_sent_as_jpeg() {
    let server = MockVisionServer::start(200, SUCCESS_BODY).await;
    let config = VisionConfig::builder()
        .endpoint(&server.url)
        .api_key("k")
        .image_format(ImageFormat::lossy(70))
        .temperature(0.2)
        .build()
        .unwrap();

    describe_image(RasterSurface::Decoded(test_image()), &config)
        .await
        .unwrap();

    let body = &server.requests()[0].body;
    let url = body["messages"][0]["content"][1]["image_url"]["url"]
        .as_str()
        .unwrap();
    assert!(url.starts_with("data:image/jpeg;base64,"));
    assert!(body["temperature"].as_f64().unwrap() > 0.0);
}

#[derive(Default)]
struct StageRecorder {
    events: Mutex<Vec<String>>,
}

impl VisionProgressCallback for StageRecorder {
    fn on_stage_start(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("start:{stage}"));
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("done:{stage}"));
    }

    fn on_error(&self, stage: Stage, _error: &str) {
        self.events.lock().unwrap().push(format!("error:{stage}"));
    }

    fn on_result(&self, result: &ClassifiedResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("result:{}", result.label()));
    }
}

#[tokio::test]
async fn progress_events_follow_stage_order() {
    let server = MockVisionServer::start(200, SUCCESS_BODY).await;
    let recorder = Arc::new(StageRecorder::default());
    let config = VisionConfig::builder()
        .endpoint(&server.url)
        .api_key("k")
        .progress_callback(Arc::clone(&recorder) as Arc<dyn VisionProgressCallback>)
        .build()
        .unwrap();

    describe_image(RasterSurface::Decoded(test_image()), &config)
        .await
        .unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "start:readback",
            "done:readback",
            "start:encode",
            "done:encode",
            "start:request",
            "done:request",
            "start:transport",
            "done:transport",
            "result:success",
        ]
    );
}

#[tokio::test]
async fn progress_reports_readback_failure() {
    let recorder = Arc::new(StageRecorder::default());
    let config = VisionConfig::builder()
        .endpoint(closed_endpoint())
        .progress_callback(Arc::clone(&recorder) as Arc<dyn VisionProgressCallback>)
        .build()
        .unwrap();

    let err = describe(Arc::new(CpuBackend::default()), None, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, VisionError::SurfaceUnavailable));
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["start:readback", "error:readback"]
    );
}

#[test]
fn describe_sync_runs_its_own_runtime() {
    let out = edgequake_vision::describe_sync(
        RasterSurface::Decoded(test_image()),
        &config_for(&closed_endpoint()),
    )
    .unwrap();
    assert!(!out.result.is_success());
}

#[tokio::test]
async fn image_file_on_disk_is_described() {
    let server = MockVisionServer::start(200, SUCCESS_BODY).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shot.png");
    test_image().save(&path).unwrap();

    let bytes = tokio::fs::read(&path).await.unwrap();
    let surface = RasterSurface::from_encoded(bytes).unwrap();
    let output = describe_image(surface, &config_for(&server.url))
        .await
        .unwrap();

    assert_eq!(output.result.text(), Some("A cat on a mat."));
    assert_eq!((output.stats.width, output.stats.height), (9, 5));
}
