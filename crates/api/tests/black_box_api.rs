use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

use taskforge_api::app;
use taskforge_api::config::AppConfig;
use taskforge_infra::jobs::JobEngineHandle;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _engine: JobEngineHandle,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same wiring as prod, with fast handlers and an ephemeral port.
        let config = AppConfig {
            environment: "test".to_string(),
            backoff_base: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            reminder_duration: Duration::from_millis(20),
            report_duration: Duration::from_millis(20),
            ..AppConfig::default()
        };
        let (services, engine) = app::build_services(&config);
        let engine = engine.spawn();
        let router = app::build_app(services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}/api/v1", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            handle,
            _engine: engine,
        }
    }

    fn root_url(&self) -> String {
        self.base_url.trim_end_matches("/api/v1").to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_task(client: &reqwest::Client, base_url: &str, body: Value) -> Value {
    let res = client
        .post(format!("{}/tasks", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    created["data"].clone()
}

async fn job_state_eventually(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    state: &str,
) -> Value {
    // Jobs run in the background; poll until the worker pool catches up.
    for _ in 0..200 {
        let res = client
            .get(format!("{}/jobs/{}/status", base_url, job_id))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["data"]["state"] == state {
            return body["data"].clone();
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {job_id} did not reach {state} within timeout");
}

#[tokio::test]
async fn health_reports_ok() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/health", srv.root_url())).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "OK");
    assert_eq!(body["environment"], "test");
    assert!(body["uptime"].as_f64().is_some());
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/nope", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn task_lifecycle_create_update_list_delete() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Create
    let task = create_task(
        &client,
        &srv.base_url,
        json!({ "title": "  Write docs  ", "assigned_to": "alex" }),
    )
    .await;
    let id = task["id"].as_str().unwrap().to_string();
    assert_eq!(task["title"], "Write docs");
    assert_eq!(task["status"], "pending");

    // Patch
    let res = client
        .patch(format!("{}/tasks/{}", srv.base_url, id))
        .json(&json!({ "status": "in_progress" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["data"]["status"], "in_progress");

    // List by status
    let res = client
        .get(format!("{}/tasks/status/in_progress", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let listed: Value = res.json().await.unwrap();
    assert_eq!(listed["pagination"]["total"], 1);
    assert_eq!(listed["data"][0]["id"], id.as_str());

    // Paginated list
    create_task(&client, &srv.base_url, json!({ "title": "Second" })).await;
    let res = client
        .get(format!("{}/tasks?page=2&limit=1&sortBy=title&sortOrder=asc", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: Value = res.json().await.unwrap();
    assert_eq!(page["pagination"]["pages"], 2);
    assert_eq!(page["data"][0]["title"], "Write docs");

    // Delete
    let res = client
        .delete(format!("{}/tasks/{}", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/tasks/{}", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn task_validation_errors_are_400() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let past = (Utc::now() - ChronoDuration::days(1)).to_rfc3339();
    for body in [
        json!({ "title": "   " }),
        json!({ "title": "x".repeat(201) }),
        json!({ "title": "ok", "due_date": past }),
        json!({ "title": "ok", "status": "archived" }),
        json!({ "no_title": true }),
    ] {
        let res = client
            .post(format!("{}/tasks", srv.base_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{body}");
        let err: Value = res.json().await.unwrap();
        assert_eq!(err["success"], false);
    }

    let res = client
        .get(format!("{}/tasks/not-a-uuid", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(format!("{}/tasks?limit=500", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn immediate_reminder_runs_to_completion() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let task = create_task(&client, &srv.base_url, json!({ "title": "Call back" })).await;
    let task_id = task["id"].as_str().unwrap();

    let res = client
        .post(format!("{}/tasks/{}/schedule", srv.base_url, task_id))
        .json(&json!({ "job_type": "reminder", "delay": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let scheduled: Value = res.json().await.unwrap();
    let job_id = scheduled["data"]["jobId"].as_str().unwrap().to_string();
    assert_eq!(scheduled["data"]["taskId"], task_id);

    let status = job_state_eventually(&client, &srv.base_url, &job_id, "completed").await;
    assert_eq!(status["attemptsMade"], 1);
    assert_eq!(status["progress"], 100);
    assert_eq!(status["name"], format!("reminder-{task_id}"));
    assert_eq!(status["result"]["message"], "Reminder sent for task: Call back");
    assert!(status["finishedOn"].is_string());

    let res = client
        .get(format!("{}/queue/stats", srv.base_url))
        .send()
        .await
        .unwrap();
    let stats: Value = res.json().await.unwrap();
    assert_eq!(stats["data"]["completed"], 1);
    assert_eq!(stats["data"]["waiting"], 0);
}

#[tokio::test]
async fn report_job_fails_after_task_is_deleted() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let task = create_task(&client, &srv.base_url, json!({ "title": "Temp" })).await;
    let task_id = task["id"].as_str().unwrap();

    let res = client
        .post(format!("{}/tasks/{}/schedule", srv.base_url, task_id))
        .json(&json!({ "job_type": "report", "delay": 100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let scheduled: Value = res.json().await.unwrap();
    let job_id = scheduled["data"]["jobId"].as_str().unwrap().to_string();

    client
        .delete(format!("{}/tasks/{}", srv.base_url, task_id))
        .send()
        .await
        .unwrap();

    // 3 attempts with 20ms, 40ms backoff in between
    let status = job_state_eventually(&client, &srv.base_url, &job_id, "failed").await;
    assert_eq!(status["attemptsMade"], 3);
    assert_eq!(status["lastError"], "Task not found");
}

#[tokio::test]
async fn delayed_job_can_be_inspected_and_removed() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let task = create_task(&client, &srv.base_url, json!({ "title": "Later" })).await;
    let task_id = task["id"].as_str().unwrap();

    let res = client
        .post(format!("{}/tasks/{}/schedule", srv.base_url, task_id))
        .json(&json!({ "job_type": "report", "delay": 60_000, "data": { "reportType": "weekly" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let scheduled: Value = res.json().await.unwrap();
    let job_id = scheduled["data"]["jobId"].as_str().unwrap().to_string();
    assert_eq!(scheduled["data"]["state"], "delayed");

    let res = client
        .get(format!("{}/jobs?state=delayed", srv.base_url))
        .send()
        .await
        .unwrap();
    let listed: Value = res.json().await.unwrap();
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert_eq!(listed["data"][0]["payload"]["reportType"], "weekly");

    let res = client
        .get(format!("{}/queue/stats", srv.base_url))
        .send()
        .await
        .unwrap();
    let stats: Value = res.json().await.unwrap();
    assert_eq!(stats["data"]["delayed"], 1);

    let res = client
        .delete(format!("{}/jobs/{}", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/jobs/{}/status", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn schedule_rejections() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let task = create_task(&client, &srv.base_url, json!({ "title": "Gate" })).await;
    let task_id = task["id"].as_str().unwrap();
    let past = (Utc::now() - ChronoDuration::minutes(1)).to_rfc3339();
    let future = (Utc::now() + ChronoDuration::minutes(1)).to_rfc3339();

    let cases = [
        (json!({ "job_type": "reminder", "scheduled_for": past }), StatusCode::BAD_REQUEST),
        (json!({ "job_type": "reminder", "delay": -1 }), StatusCode::BAD_REQUEST),
        (
            json!({ "job_type": "reminder", "delay": 10, "scheduled_for": future }),
            StatusCode::BAD_REQUEST,
        ),
        (json!({ "job_type": "email" }), StatusCode::BAD_REQUEST),
    ];
    for (body, expected) in cases {
        let res = client
            .post(format!("{}/tasks/{}/schedule", srv.base_url, task_id))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), expected, "{body}");
    }

    let res = client
        .post(format!("{}/tasks/{}/schedule", srv.base_url, unknown_task_id()))
        .json(&json!({ "job_type": "reminder" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["message"], "Task not found");

    let res = client
        .get(format!("{}/queue/stats", srv.base_url))
        .send()
        .await
        .unwrap();
    let stats: Value = res.json().await.unwrap();
    for bucket in ["waiting", "active", "completed", "failed", "delayed"] {
        assert_eq!(stats["data"][bucket], 0, "{bucket}");
    }
}

fn unknown_task_id() -> String {
    taskforge_core::TaskId::new().to_string()
}
