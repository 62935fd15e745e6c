use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
};
use gateway::{AppState, router};
use image::{ImageFormat, RgbImage};
use inference::{
    DecodeFailurePolicy, DetectionParams, DetectorBackend, Orchestrator, RawBox, ResultGroup,
};
use serde_json::{Value, json};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

const BOUNDARY: &str = "----WebKitFormBoundaryvarroa";

#[derive(Default)]
struct FakeOptions {
    loads: Arc<AtomicUsize>,
    fail_load: bool,
}

/// Reports one mite per pixel column for images two pixels wide, none otherwise.
struct FakeDetector;

impl DetectorBackend for FakeDetector {
    type Options = FakeOptions;

    fn load_model(_path: &str, options: &FakeOptions) -> anyhow::Result<Self> {
        options.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        if options.fail_load {
            anyhow::bail!("weights file not found");
        }
        Ok(FakeDetector)
    }

    fn infer(
        &mut self,
        image: &RgbImage,
        _params: &DetectionParams,
    ) -> anyhow::Result<Vec<ResultGroup>> {
        if image.width() != 2 {
            return Ok(vec![ResultGroup::default()]);
        }

        Ok(vec![
            ResultGroup::new(vec![RawBox {
                xyxy: [10.0, 20.0, 30.0, 40.0],
                confidence: 0.91,
                class_id: 0,
            }]),
            ResultGroup::default(),
            ResultGroup::new(vec![RawBox {
                xyxy: [50.0, 60.0, 70.0, 80.0],
                confidence: 0.42,
                class_id: 0,
            }]),
        ])
    }
}

struct TestApp {
    app: Router,
    state: AppState<FakeDetector>,
    loads: Arc<AtomicUsize>,
}

fn test_app(options: FakeOptions, policy: DecodeFailurePolicy) -> TestApp {
    let loads = options.loads.clone();
    let orchestrator = Arc::new(Orchestrator::<FakeDetector>::new(options, policy));
    let state = AppState::new(
        orchestrator,
        DetectionParams::new("model/weights/best.onnx"),
        2,
        Duration::from_millis(100),
    );

    TestApp {
        app: router(state.clone(), 1024 * 1024, 64),
        state,
        loads,
    }
}

fn default_app() -> TestApp {
    test_app(FakeOptions::default(), DecodeFailurePolicy::Empty)
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    RgbImage::new(width, height)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

fn png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

fn multipart_body(field: &str, filename: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_get_serves_upload_form() {
    let TestApp { app, .. } = default_app();

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("<h1>Varroa Mite Detector API</h1>"));
    assert!(html.contains("value=\"Upload and Detect\""));
    assert!(html.contains("enctype=\"multipart/form-data\""));
    assert!(html.contains("name=\"file\""));
}

#[tokio::test]
async fn test_wrong_content_type_is_415() {
    let TestApp { app, loads, .. } = default_app();

    let request = Request::post("/")
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_LENGTH, 2)
        .body(Body::from("{}"))
        .unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        json,
        json!({"message": "Unsupported content type. Please use multipart/form-data."})
    );
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_content_type_is_415() {
    let TestApp { app, .. } = default_app();

    let (status, _) = send(&app, Request::post("/").body(Body::from("x")).unwrap()).await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_missing_boundary_is_400() {
    let TestApp { app, .. } = default_app();

    let request = Request::post("/")
        .header(CONTENT_TYPE, "multipart/form-data")
        .header(CONTENT_LENGTH, 4)
        .body(Body::from("data"))
        .unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Missing boundary in multipart/form-data");
}

#[tokio::test]
async fn test_overlong_boundary_is_400() {
    let TestApp { app, loads, .. } = default_app();

    let boundary = format!("{}X", "-".repeat(1600));
    let body = vec![b'-'; 64 * 1024];
    let request = Request::post("/")
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .header(CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Missing boundary in multipart/form-data");
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_content_length_is_400() {
    let TestApp { app, .. } = default_app();

    let request = Request::post("/")
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({"message": "Empty request body"}));
}

#[tokio::test]
async fn test_missing_file_field_is_400() {
    let TestApp { app, loads, .. } = default_app();

    let body = multipart_body("attachment", "board.png", &png(2, 2));
    let (status, json) = send(&app, upload(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({"message": "Missing 'file' field in form data"}));
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_filename_is_400() {
    let TestApp { app, .. } = default_app();

    let (status, json) = send(&app, upload(multipart_body("file", "", b""))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "No file selected");
}

#[tokio::test]
async fn test_no_detections() {
    let TestApp { app, .. } = default_app();

    let (status, json) = send(&app, upload(multipart_body("file", "board.png", &png(1, 1)))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({"message": "No varroa mites detected", "result": [], "count": 0})
    );
}

#[tokio::test]
async fn test_two_detections() {
    let TestApp { app, loads, .. } = default_app();

    let (status, json) = send(&app, upload(multipart_body("file", "board.png", &png(2, 2)))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "File processed successfully");
    assert_eq!(json["count"], 2);

    let result = json["result"].as_array().unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[0]["class_name"], "varroa_mite");
    assert_eq!(result[1]["class_name"], "varroa_mite");
    assert_eq!(result[0]["class"], 0);
    assert_eq!(result[0]["x1"], 10.0);
    assert_eq!(result[1]["y2"], 80.0);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bmp_upload_is_decoded() {
    let TestApp { app, .. } = default_app();

    let bmp = encode(2, 3, ImageFormat::Bmp);
    let (status, json) = send(&app, upload(multipart_body("file", "board.bmp", &bmp))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
}

#[tokio::test]
async fn test_zero_byte_file_reports_no_detections() {
    let TestApp { app, loads, .. } = default_app();

    let (status, json) = send(&app, upload(multipart_body("file", "empty.jpg", b""))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 0);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_undecodable_upload_reports_no_detections_by_default() {
    let TestApp { app, .. } = default_app();

    let body = multipart_body("file", "notes.txt", b"definitely not an image");
    let (status, json) = send(&app, upload(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "No varroa mites detected");
}

#[tokio::test]
async fn test_undecodable_upload_rejected_with_reject_policy() {
    let TestApp { app, .. } = test_app(FakeOptions::default(), DecodeFailurePolicy::Reject);

    let body = multipart_body("file", "notes.txt", b"definitely not an image");
    let (status, json) = send(&app, upload(body)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json, json!({"message": "Unable to decode image"}));
}

#[tokio::test]
async fn test_model_load_failure_is_permanent() {
    let options = FakeOptions {
        fail_load: true,
        ..Default::default()
    };
    let TestApp { app, loads, .. } = test_app(options, DecodeFailurePolicy::Empty);

    for _ in 0..3 {
        let (status, json) =
            send(&app, upload(multipart_body("file", "board.png", &png(2, 2)))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json, json!({"message": "Model initialization failed"}));
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1, "Failed load must not be retried");
}

#[tokio::test]
async fn test_busy_when_no_permit_frees_up() {
    let TestApp { app, state, loads } = default_app();

    // Hold every permit so the upload times out in the queue
    let _held = state.inference_permits.clone().acquire_many_owned(2).await.unwrap();

    let (status, json) = send(&app, upload(multipart_body("file", "board.png", &png(2, 2)))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json, json!({"message": "Server busy, retry later"}));
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_uploads_load_model_once() {
    let options = FakeOptions::default();
    let loads = options.loads.clone();
    let orchestrator = Arc::new(Orchestrator::<FakeDetector>::new(
        options,
        DecodeFailurePolicy::Empty,
    ));
    let state = AppState::new(
        orchestrator,
        DetectionParams::new("model/weights/best.onnx"),
        8,
        Duration::from_secs(10),
    );
    let app = router(state, 1024 * 1024, 64);

    let image = png(2, 2);
    let requests: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            let body = multipart_body("file", "board.png", &image);
            tokio::spawn(async move { send(&app, upload(body)).await })
        })
        .collect();

    for request in requests {
        let (status, json) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 2);
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_request_slot_serves_every_request() {
    let orchestrator = Arc::new(Orchestrator::<FakeDetector>::new(
        FakeOptions::default(),
        DecodeFailurePolicy::Empty,
    ));
    let state = AppState::new(
        orchestrator,
        DetectionParams::new("model/weights/best.onnx"),
        4,
        Duration::from_secs(10),
    );
    let app = router(state, 1024 * 1024, 1);

    let image = png(2, 2);
    let requests: Vec<_> = (0..4)
        .map(|_| {
            let app = app.clone();
            let body = multipart_body("file", "board.png", &image);
            tokio::spawn(async move { send(&app, upload(body)).await })
        })
        .collect();

    for request in requests {
        let (status, json) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK, "Queued requests must still complete");
        assert_eq!(json["count"], 2);
    }

    let (status, _) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK, "Slot is released after each request");
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let TestApp { app, .. } = default_app();

    let health = || Request::get("/health").body(Body::empty()).unwrap();

    let (status, json) = send(&app, health()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"status": "ok", "model_loaded": false}));

    send(&app, upload(multipart_body("file", "board.png", &png(1, 1)))).await;

    let (_, json) = send(&app, health()).await;
    assert_eq!(json["model_loaded"], true);
}

#[tokio::test]
async fn test_unknown_route_and_method() {
    let TestApp { app, .. } = default_app();

    let (status, _) = send(&app, Request::get("/detect").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Request::put("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_body_over_limit_is_rejected() {
    let TestApp { app, .. } = default_app();

    let payload = vec![0u8; 2 * 1024 * 1024];
    let (status, _) = send(&app, upload(multipart_body("file", "huge.png", &payload))).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_raw_http_over_tcp() {
    let TestApp { app, .. } = default_app();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let body = multipart_body("file", "board.png", &png(2, 2));
    let head = format!(
        "POST / HTTP/1.1\r\nHost: {addr}\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.to_ascii_lowercase().contains("content-type: application/json"));
    assert!(response.contains("\"count\":2"));
}
