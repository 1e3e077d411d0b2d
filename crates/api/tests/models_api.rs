//! Integration tests for the model operation routes.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{body_json, body_lines, delete, get as get_req, multipart_request, post_json, zip_bytes, Part};
use modelhub_core::{create_task, TaskBody};
use serde_json::{json, Value};

fn assert_ends_ok(lines: &[Value]) {
    let last = lines.last().expect("stream must not be empty");
    assert_eq!(last["details"]["end"], true);
    assert_eq!(last["status"], 200, "unexpected terminal message: {last}");
}

fn assert_ends_failed(lines: &[Value], kind: &str) {
    let last = lines.last().expect("stream must not be empty");
    assert_eq!(last["details"]["end"], true);
    assert_eq!(last["status"], 500);
    assert_eq!(last["progress"], -1.0);
    assert_eq!(last["details"]["error"]["kind"], kind);
}

/// Fake model server recording the body of every `/api/create` call.
async fn fake_model_server(lines: &'static str) -> (u16, Arc<Mutex<Vec<Value>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();
    let app = Router::new()
        .route("/", get(|| async { "Ollama is running" }))
        .route(
            "/api/create",
            post(move |Json(body): Json<Value>| {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(body);
                    Body::from(lines)
                }
            }),
        );
    let addr = common::serve(app).await;
    (addr.port(), calls)
}

// ---------------------------------------------------------------------------
// Test: list streams one NDJSON line per model, then the end-sentinel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_streams_models_as_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("mistral")).unwrap();
    std::fs::create_dir(dir.path().join("llama")).unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let response = get_req(app, "/model/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        modelhub_api::response::NDJSON_CONTENT_TYPE
    );

    let lines = body_lines(response).await;
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["action"], "Found model llama");
    assert_eq!(lines[0]["progress"], 0.5);
    assert_eq!(lines[1]["details"]["model"], "mistral");
    assert_eq!(lines[1]["progress"], 1.0);
    assert!(lines[0]["timestamp"].is_string());
    assert_ends_ok(&lines);
}

#[tokio::test]
async fn list_of_empty_store_is_just_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let lines = body_lines(get_req(app, "/model/").await).await;
    assert_eq!(lines.len(), 1);
    assert_ends_ok(&lines);
}

// ---------------------------------------------------------------------------
// Test: delete rejections happen before any stream starts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_of_missing_model_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = common::build_test_app(common::test_config(dir.path()));

    let response = delete(app, "/model/?model=ghost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    assert!(!state.registry.contains("ghost"));
}

#[tokio::test]
async fn delete_without_model_name_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let response = delete(app, "/model/").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn delete_rejects_path_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let response = delete(app, "/model/?model=..%2Fetc").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_of_busy_model_returns_409() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("m1")).unwrap();
    let (app, state) = common::build_test_app(common::test_config(dir.path()));
    let _held = state.registry.claim("m1", "other-task").unwrap();

    let response = delete(app, "/model/?model=m1").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
    assert!(dir.path().join("m1").is_dir());
}

#[tokio::test]
async fn refused_claim_opens_no_room_and_keeps_the_holder() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("m1")).unwrap();
    let (app, state) = common::build_test_app(common::test_config(dir.path()));
    let _held = state.registry.claim("m1", "other-task").unwrap();

    let response = delete(app.clone(), "/model/?model=m1&delivery=broadcast").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = post_json(
        app,
        "/model/create/?delivery=broadcast",
        json!({ "model": "m1", "model_name_on_ollama": "m1:latest" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    assert_eq!(state.rooms.room_count().await, 0);
    assert_eq!(state.executor.in_flight(), 0);
    assert_eq!(state.registry.holder("m1").as_deref(), Some("other-task"));
}

// ---------------------------------------------------------------------------
// Test: delete removes the model and releases its claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_removes_model_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("m1/nested")).unwrap();
    std::fs::write(dir.path().join("m1/base.gguf"), b"weights").unwrap();
    let (app, state) = common::build_test_app(common::test_config(dir.path()));

    let lines = body_lines(delete(app, "/model/?model=m1").await).await;
    assert_eq!(lines[0]["action"], "Deleting model m1");
    assert_eq!(lines[1]["action"], "Deleted model m1");
    assert_ends_ok(&lines);
    assert!(!dir.path().join("m1").exists());
    assert!(!state.registry.contains("m1"));
}

// ---------------------------------------------------------------------------
// Test: upload spools, extracts and reports both steps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_extracts_archive_into_model_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = common::build_test_app(common::test_config(dir.path()));
    let archive = zip_bytes(&[("base.gguf", "weights"), ("x-lora.gguf", "adapter")]);

    let request = multipart_request(
        "/upload/",
        &[Part::File {
            name: "model",
            filename: "llama.zip",
            bytes: &archive,
        }],
    );
    let response = common::send(app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let lines = body_lines(response).await;
    assert_eq!(lines[0]["action"], "Saved archive llama.zip");
    assert_eq!(lines[0]["details"]["bytes"], archive.len());
    assert_eq!(lines[1]["action"], "Extracted model llama");
    assert_ends_ok(&lines);

    assert!(dir.path().join("llama/base.gguf").is_file());
    assert!(dir.path().join("llama/x-lora.gguf").is_file());
    assert!(!state.registry.contains("llama"));
}

#[tokio::test]
async fn upload_of_corrupt_archive_fails_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let request = multipart_request(
        "/upload/",
        &[Part::File {
            name: "model",
            filename: "broken.zip",
            bytes: b"this is not a zip archive",
        }],
    );
    let lines = body_lines(common::send(app, request).await).await;
    assert_ends_failed(&lines, "internal");
    assert!(!dir.path().join("broken").exists());
}

#[tokio::test]
async fn upload_rejects_non_zip_filename() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let request = multipart_request(
        "/upload/",
        &[Part::File {
            name: "model",
            filename: "weights.tar",
            bytes: b"abc",
        }],
    );
    let response = common::send(app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn upload_without_model_field_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let request = multipart_request(
        "/upload/",
        &[Part::Text {
            name: "comment",
            value: "no file here",
        }],
    );
    let response = common::send(app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "no spool file may be left behind");
}

#[tokio::test]
async fn upload_of_busy_model_returns_409_and_removes_spool() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = common::build_test_app(common::test_config(dir.path()));
    let _held = state.registry.claim("llama", "other-task").unwrap();

    let archive = zip_bytes(&[("base.gguf", "weights")]);
    let request = multipart_request(
        "/upload/",
        &[Part::File {
            name: "model",
            filename: "llama.zip",
            bytes: &archive,
        }],
    );
    let response = common::send(app, request).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

// ---------------------------------------------------------------------------
// Test: broadcast delivery answers 202 with the observer path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_delivery_returns_task_id() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = common::build_test_app(common::test_config(dir.path()));

    let response = get_req(app, "/model/?delivery=broadcast").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    let task_id = json["data"]["task_id"].as_str().unwrap().to_string();
    assert_eq!(json["data"]["ws_path"], format!("/ws/{task_id}"));
    assert!(state.rooms.contains(&task_id).await);
}

#[tokio::test]
async fn unknown_delivery_mode_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let response = get_req(app, "/model/?delivery=carrier-pigeon").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: a saturated executor rejects new work with 503
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saturated_executor_returns_503() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path());
    config.max_workers = 1;
    config.task_queue_depth = 0;
    let (app, state) = common::build_test_app(config);

    let (release, wait) = std::sync::mpsc::channel::<()>();
    let (ctx, _stream) = create_task("Hold", &state.channel);
    state
        .executor
        .submit(
            ctx,
            TaskBody::blocking(move || {
                let _ = wait.recv();
                Ok(())
            }),
        )
        .unwrap();

    let response = get_req(app, "/model/").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "CAPACITY_EXCEEDED");

    release.send(()).unwrap();
}

// ---------------------------------------------------------------------------
// Test: create renders the Modelfile and relays the model server stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_relays_model_server_progress() {
    let (port, calls) = fake_model_server(
        "{\"status\":\"reading model metadata\"}\n\
         {\"status\":\"pulling\",\"total\":4,\"completed\":1,\"layer\":{\"index\":3}}\n\
         {\"status\":\"success\"}\n",
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("m1")).unwrap();
    std::fs::write(dir.path().join("m1/base.gguf"), b"weights").unwrap();
    std::fs::write(dir.path().join("m1/chat-lora.gguf"), b"adapter").unwrap();
    let mut config = common::test_config(dir.path());
    config.model_server_port = port;
    let (app, state) = common::build_test_app(config);

    let response = post_json(
        app,
        "/model/create/",
        json!({ "model": "m1", "model_name_on_ollama": "m1:latest" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let lines = body_lines(response).await;
    let modelfile = "FROM /home/m1/base.gguf\nADAPTER /home/m1/chat-lora.gguf";
    assert_eq!(lines[0]["action"], "Prepared Modelfile");
    assert_eq!(lines[0]["details"]["modelfile"], modelfile);
    assert_eq!(lines[1]["action"], "reading model metadata");
    assert_eq!(lines[2]["action"], "pulling");
    assert_eq!(lines[2]["progress"], 0.25);
    assert_eq!(
        lines[2]["details"]["downstream"],
        json!({ "status": "pulling", "total": 4, "completed": 1, "layer": { "index": 3 } })
    );
    assert_eq!(lines[3]["action"], "success");
    assert_eq!(lines.len(), 5);
    assert_ends_ok(&lines);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["model"], "m1:latest");
    assert_eq!(calls[0]["modelfile"], modelfile);
    assert!(!state.registry.contains("m1"));
}

#[tokio::test]
async fn create_reports_model_server_error_line() {
    let (port, _) = fake_model_server(
        "{\"status\":\"reading model metadata\"}\n{\"error\":\"invalid model file\"}\n",
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("m1")).unwrap();
    std::fs::write(dir.path().join("m1/base.gguf"), b"weights").unwrap();
    let mut config = common::test_config(dir.path());
    config.model_server_port = port;
    let (app, _) = common::build_test_app(config);

    let response = post_json(
        app,
        "/model/create/",
        json!({ "model": "m1", "model_name_on_ollama": "m1" }),
    )
    .await;
    let lines = body_lines(response).await;
    assert_ends_failed(&lines, "downstream");
    assert!(lines
        .last()
        .unwrap()["details"]["error"]["message"]
        .as_str()
        .unwrap()
        .contains("invalid model file"));
}

#[tokio::test]
async fn create_with_unreachable_model_server_fails_downstream() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("m1")).unwrap();
    std::fs::write(dir.path().join("m1/base.gguf"), b"weights").unwrap();
    let (app, state) = common::build_test_app(common::test_config(dir.path()));

    let response = post_json(
        app,
        "/model/create/",
        json!({ "model": "m1", "model_name_on_ollama": "m1" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let lines = tokio::time::timeout(Duration::from_secs(10), body_lines(response))
        .await
        .unwrap();
    assert_eq!(lines.len(), 2);
    assert_ends_failed(&lines, "downstream");
    assert!(!state.registry.contains("m1"));
}

#[tokio::test]
async fn create_of_missing_model_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let response = post_json(
        app,
        "/model/create/",
        json!({ "model": "ghost", "model_name_on_ollama": "ghost" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_with_empty_target_name_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("m1")).unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));

    let response = post_json(
        app,
        "/model/create/",
        json!({ "model": "m1", "model_name_on_ollama": "" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: deploy uploads then creates within one stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_uploads_then_creates() {
    let (port, calls) = fake_model_server("{\"status\":\"success\"}\n").await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path());
    config.model_server_port = port;
    let (app, _) = common::build_test_app(config);
    let archive = zip_bytes(&[("base.gguf", "weights")]);

    let request = multipart_request(
        "/deploy/",
        &[
            Part::File {
                name: "model",
                filename: "qwen.zip",
                bytes: &archive,
            },
            Part::Text {
                name: "model_name_on_ollama",
                value: "qwen:custom",
            },
        ],
    );
    let lines = body_lines(common::send(app, request).await).await;

    let actions: Vec<&str> = lines.iter().filter_map(|l| l["action"].as_str()).collect();
    assert_eq!(
        actions[..4],
        [
            "Saved archive qwen.zip",
            "Extracted model qwen",
            "Prepared Modelfile",
            "success"
        ]
    );
    assert_ends_ok(&lines);
    assert_eq!(calls.lock().unwrap()[0]["model"], "qwen:custom");
    assert!(dir.path().join("qwen/base.gguf").is_file());
}

#[tokio::test]
async fn deploy_without_target_name_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = common::build_test_app(common::test_config(dir.path()));
    let archive = zip_bytes(&[("base.gguf", "weights")]);

    let request = multipart_request(
        "/deploy/",
        &[Part::File {
            name: "model",
            filename: "qwen.zip",
            bytes: &archive,
        }],
    );
    let response = common::send(app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!dir.path().join("qwen").exists());
}
