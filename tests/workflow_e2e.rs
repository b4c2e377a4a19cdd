//! End-to-end workflow tests against mocked collaborators

use axum::Router;
use hyper::StatusCode;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inquest::config::Config;

mod common;
use common::{backend, capability, fast_tuning, rule, test_state};

async fn allow_all(policy: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "allow": true,
            "reason": "ok"
        })))
        .mount(policy)
        .await;
}

async fn worker_success(server: &MockServer, summary: &str, confidence: f64) {
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "payload": {"summary": summary, "confidence": confidence}
        })))
        .mount(server)
        .await;
}

async fn request(
    app: &Router,
    method_name: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = hyper::Request::builder()
        .method(method_name)
        .uri(uri)
        .header("content-type", "application/json");
    let body = match body {
        Some(json) => axum::body::Body::from(json.to_string()),
        None => axum::body::Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

fn phase_names(response: &serde_json::Value) -> Vec<String> {
    response["report"]["phases"]
        .as_array()
        .map(|phases| {
            phases
                .iter()
                .map(|p| p["phase"].as_str().unwrap_or("").to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_authorized_request_succeeds_end_to_end() {
    let policy = MockServer::start().await;
    let gcloud = MockServer::start().await;
    let monitoring = MockServer::start().await;
    let planner = MockServer::start().await;

    allow_all(&policy).await;
    worker_success(&gcloud, "instance created", 0.9).await;
    worker_success(&monitoring, "report archived", 0.9).await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"capability": "gcloud", "instruction": "create an e2-micro instance"}
        ])))
        .mount(&planner)
        .await;

    let config = Config {
        capabilities: vec![
            capability("gcloud", &gcloud.uri()),
            capability("monitoring", &monitoring.uri()),
        ],
        default_capability: "monitoring".into(),
        intent_rules: vec![rule(&["vm", "instance"], "gcloud")],
        policy_gate_url: format!("{}/authorize", policy.uri()),
        planner_backends: vec![backend("primary", &planner.uri())],
        reporting_capability: Some("monitoring".into()),
        delegation: fast_tuning(),
    };
    let app = inquest::router(test_state(config).await);

    let (status, body) = request(
        &app,
        "POST",
        "/requests",
        Some(json!({"request_text": "create a VM instance", "acting_user": "alice"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["error"].is_null());
    assert!(body["report"]["confidence"].as_f64().unwrap() > 0.8);

    let phases = phase_names(&body);
    assert_eq!(
        phases,
        vec![
            "planning",
            "routing",
            "analysis",
            "resolution",
            "documentation"
        ]
    );

    // The archived session re-renders to the identical report
    let session_id = body["session_id"].as_str().unwrap();
    let (status, archived) = request(
        &app,
        "GET",
        &format!("/sessions/{}", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(archived["report"], body["report"]);
    assert_eq!(archived["session"]["phase"], "done");
}

#[tokio::test]
async fn test_denied_request_attempts_no_delegation() {
    let policy = MockServer::start().await;
    let gcloud = MockServer::start().await;
    let monitoring = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "allow": false,
            "reason": "bob does not have access to gcloud"
        })))
        .mount(&policy)
        .await;

    // No delegation may reach any worker
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&gcloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&monitoring)
        .await;

    let config = Config {
        capabilities: vec![
            capability("gcloud", &gcloud.uri()),
            capability("monitoring", &monitoring.uri()),
        ],
        default_capability: "monitoring".into(),
        intent_rules: vec![rule(&["vm", "instance"], "gcloud")],
        policy_gate_url: format!("{}/authorize", policy.uri()),
        planner_backends: vec![],
        reporting_capability: None,
        delegation: fast_tuning(),
    };
    let app = inquest::router(test_state(config).await);

    let (status, body) = request(
        &app,
        "POST",
        "/requests",
        Some(json!({"request_text": "create a VM instance", "acting_user": "bob"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("does not have access"));

    // Planning ran before the denial, so a partial report is still attached
    assert_eq!(phase_names(&body), vec!["planning"]);
}

#[tokio::test]
async fn test_routing_failures_abort_with_partial_report() {
    let policy = MockServer::start().await;
    let gcloud = MockServer::start().await;
    let logs = MockServer::start().await;
    let monitoring = MockServer::start().await;
    let planner = MockServer::start().await;

    allow_all(&policy).await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"capability": "gcloud", "instruction": "check the instances"},
            {"capability": "logs", "instruction": "pull crash logs"}
        ])))
        .mount(&planner)
        .await;

    // Both routing targets fail with retryable errors until the cap
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&gcloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&logs)
        .await;

    let config = Config {
        capabilities: vec![
            capability("gcloud", &gcloud.uri()),
            capability("logs", &logs.uri()),
            capability("monitoring", &monitoring.uri()),
        ],
        default_capability: "monitoring".into(),
        intent_rules: vec![rule(&["instance", "outage"], "gcloud")],
        policy_gate_url: format!("{}/authorize", policy.uri()),
        planner_backends: vec![backend("primary", &planner.uri())],
        reporting_capability: Some("monitoring".into()),
        delegation: fast_tuning(),
    };
    let app = inquest::router(test_state(config).await);

    let (status, body) = request(
        &app,
        "POST",
        "/requests",
        Some(json!({"request_text": "fix the instance outage", "acting_user": "alice"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["error"], "all routing delegations failed");

    // Planning output survives into the partial report
    let phases = phase_names(&body);
    assert_eq!(phases, vec!["planning", "routing"]);

    let routing = &body["report"]["phases"][1];
    assert_eq!(routing["succeeded"], 0);
    assert_eq!(routing["failed"], 2);
}

#[tokio::test]
async fn test_lost_documentation_does_not_fail_the_investigation() {
    let policy = MockServer::start().await;
    let gcloud = MockServer::start().await;
    let reports = MockServer::start().await;
    let planner = MockServer::start().await;

    allow_all(&policy).await;
    worker_success(&gcloud, "remediation applied", 0.8).await;
    // The reporting worker is down
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&reports)
        .await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(
            {"capability": "gcloud", "instruction": "restart the instance"}
        )))
        .mount(&planner)
        .await;

    let config = Config {
        capabilities: vec![
            capability("gcloud", &gcloud.uri()),
            capability("reports", &reports.uri()),
        ],
        default_capability: "gcloud".into(),
        intent_rules: vec![rule(&["instance"], "gcloud")],
        policy_gate_url: format!("{}/authorize", policy.uri()),
        planner_backends: vec![backend("primary", &planner.uri())],
        reporting_capability: Some("reports".into()),
        delegation: fast_tuning(),
    };
    let app = inquest::router(test_state(config).await);

    let (status, body) = request(
        &app,
        "POST",
        "/requests",
        Some(json!({"request_text": "restart the instance", "acting_user": "alice"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let documentation = &body["report"]["phases"][4];
    assert_eq!(documentation["phase"], "documentation");
    assert_eq!(documentation["failed"], 1);
}

#[tokio::test]
async fn test_low_confidence_resolution_resumes_analysis_once() {
    let policy = MockServer::start().await;
    let gcloud = MockServer::start().await;
    let planner = MockServer::start().await;

    allow_all(&policy).await;
    // Every delegation succeeds but with low confidence, so the resolution
    // gate keeps asking for more analysis until the resume budget runs out.
    worker_success(&gcloud, "tentative fix", 0.2).await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(
            {"capability": "gcloud", "instruction": "inspect the instance"}
        )))
        .mount(&planner)
        .await;

    let config = Config {
        capabilities: vec![capability("gcloud", &gcloud.uri())],
        default_capability: "gcloud".into(),
        intent_rules: vec![rule(&["instance"], "gcloud")],
        policy_gate_url: format!("{}/authorize", policy.uri()),
        planner_backends: vec![backend("primary", &planner.uri())],
        reporting_capability: None,
        delegation: fast_tuning(),
    };
    let app = inquest::router(test_state(config).await);

    let (status, body) = request(
        &app,
        "POST",
        "/requests",
        Some(json!({"request_text": "fix the instance", "acting_user": "alice"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert!(body["error"].as_str().unwrap().contains("resume budget"));

    // Resolution ran twice: once before and once after the resume
    let resolution = body["report"]["phases"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["phase"] == "resolution")
        .unwrap();
    assert_eq!(resolution["succeeded"], 2);
}

#[tokio::test]
async fn test_failing_analysis_exhausts_retry_budget() {
    let policy = MockServer::start().await;
    let gcloud = MockServer::start().await;
    let logs = MockServer::start().await;
    let planner = MockServer::start().await;

    allow_all(&policy).await;
    // Routing succeeds through gcloud, but the analysis step's worker is down
    worker_success(&gcloud, "instances look healthy", 0.9).await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&logs)
        .await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(
            {"capability": "logs", "instruction": "pull crash logs"}
        )))
        .mount(&planner)
        .await;

    let config = Config {
        capabilities: vec![
            capability("gcloud", &gcloud.uri()),
            capability("logs", &logs.uri()),
        ],
        default_capability: "gcloud".into(),
        intent_rules: vec![rule(&["instance"], "gcloud")],
        policy_gate_url: format!("{}/authorize", policy.uri()),
        planner_backends: vec![backend("primary", &planner.uri())],
        reporting_capability: None,
        delegation: fast_tuning(),
    };
    let app = inquest::router(test_state(config).await);

    let (status, body) = request(
        &app,
        "POST",
        "/requests",
        Some(json!({"request_text": "why did the instance crash", "acting_user": "alice"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert!(body["error"].as_str().unwrap().contains("retry budget"));

    // One initial run plus one gate-requested retry, nothing after analysis
    assert_eq!(phase_names(&body), vec!["planning", "routing", "analysis"]);
    let analysis = &body["report"]["phases"][2];
    assert_eq!(analysis["succeeded"], 0);
    assert_eq!(analysis["failed"], 2);
}

#[tokio::test]
async fn test_planner_fallback_keeps_request_routable() {
    let policy = MockServer::start().await;
    let monitoring = MockServer::start().await;

    allow_all(&policy).await;
    worker_success(&monitoring, "checked dashboards", 0.7).await;

    // No planner backends at all: the deterministic fallback plan targets the
    // default capability with the raw request text.
    let config = Config {
        capabilities: vec![capability("monitoring", &monitoring.uri())],
        default_capability: "monitoring".into(),
        intent_rules: vec![],
        policy_gate_url: format!("{}/authorize", policy.uri()),
        planner_backends: vec![],
        reporting_capability: None,
        delegation: fast_tuning(),
    };
    let app = inquest::router(test_state(config).await);

    let (status, body) = request(
        &app,
        "POST",
        "/requests",
        Some(json!({"request_text": "look into the weird latency", "acting_user": "alice"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(phase_names(&body).contains(&"planning".to_string()));
}
