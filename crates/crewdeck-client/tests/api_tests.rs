use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Json, Router};
use crewdeck_client::{ApiClient, ApiError};
use crewdeck_core::{RunStatus, ServiceState};
use serde_json::{json, Value};
use url::Url;

async fn launch_stub() -> ApiClient {
    let app = Router::new()
        .route(
            "/api/crew/run",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["topic"], "Edge AI market analysis");
                Json(json!({ "run_id": "a1b2c3d4", "status": "started" }))
            }),
        )
        .route(
            "/api/crew/status/:run_id",
            get(|Path(run_id): Path<String>| async move {
                if run_id != "a1b2c3d4" {
                    return Json(json!({ "error": "Run not found", "run_id": run_id }));
                }
                Json(json!({
                    "run_id": "a1b2c3d4",
                    "topic": "Edge AI market analysis",
                    "status": "running",
                    "elapsed_seconds": 12.5,
                    "events_count": 7,
                    "report_path": null,
                    "charts": [],
                    "error": null
                }))
            }),
        )
        .route(
            "/api/crew/report/:run_id",
            get(|Path(run_id): Path<String>| async move {
                if run_id != "a1b2c3d4" {
                    return Json(json!({ "error": "Report not ready", "status": "running" }));
                }
                Json(json!({
                    "run_id": "a1b2c3d4",
                    "report": "# Edge AI Inference\n\nFindings...",
                    "charts": ["/output/charts/market_share.png"]
                }))
            }),
        )
        .route(
            "/api/crew/runs",
            get(|| async {
                Json(json!({
                    "runs": [
                        {
                            "run_id": "a1b2c3d4",
                            "topic": "Edge AI market analysis",
                            "status": "running",
                            "elapsed_seconds": 12.5
                        }
                    ]
                }))
            }),
        )
        .route(
            "/api/crew/events/:run_id",
            get(|Path(_): Path<String>| async {
                Json(json!({
                    "events": [
                        { "type": "agent_start", "agent": "manager", "timestamp": "t1" }
                    ]
                }))
            }),
        )
        .route(
            "/api/health",
            get(|| async {
                Json(json!({
                    "status": "ok",
                    "mock_mode": true,
                    "orchestrator": { "ollama": true, "model": "gemma3:27b" },
                    "specialist": { "ollama": true, "model": "gemma3:12b" }
                }))
            }),
        )
        .route(
            "/api/warmup",
            post(|| async { Json(json!({ "orchestrator_ms": 812, "specialist_ms": -1 })) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    ApiClient::new(Url::parse(&format!("http://{addr}")).expect("base url"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_run_returns_the_minted_id() {
    let api = launch_stub().await;
    let started = api
        .start_run("Edge AI market analysis")
        .await
        .expect("start run");
    assert_eq!(started.run_id, "a1b2c3d4");
    assert_eq!(started.status, "started");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_and_report_round_trip() {
    let api = launch_stub().await;

    let status = api.run_status("a1b2c3d4").await.expect("status");
    assert_eq!(status.status, RunStatus::Running);
    assert_eq!(status.elapsed_seconds, Some(12.5));
    assert_eq!(status.events_count, 7);

    let report = api.report("a1b2c3d4").await.expect("report");
    assert!(report.report.starts_with("# Edge AI Inference"));
    assert_eq!(report.charts.len(), 1);

    let runs = api.list_runs().await.expect("runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "a1b2c3d4");

    let events = api.events("a1b2c3d4").await.expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].agent(), Some("manager"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_error_bodies_surface_as_typed_errors() {
    let api = launch_stub().await;

    let missing = api.run_status("zzz").await;
    let Err(ApiError::Backend(message)) = &missing else {
        panic!("expected backend error, got {missing:?}");
    };
    assert_eq!(message.as_str(), "Run not found");

    let not_ready = api.report("zzz").await;
    assert!(matches!(not_ready, Err(ApiError::Backend(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_and_warmup_decode() {
    let api = launch_stub().await;

    let health = api.health().await.expect("health");
    assert_eq!(health.status, ServiceState::Ok);
    assert!(health.mock_mode);
    assert!(health.reachable());

    let warmup = api.warmup().await.expect("warmup");
    assert_eq!(warmup.orchestrator_ms, 812);
    assert_eq!(warmup.specialist_ms, -1);
}
