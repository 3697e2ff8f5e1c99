//! Delivery workflow integration tests
//!
//! Tests cover:
//! - Status transitions and the two-step approval round
//! - Adoption survey scheduling on completion and its release by the scheduler
//! - Dependency gating and cycle rejection
//! - Progress pinned at completion, reopening by admins

mod helpers;

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::{json, Value};

use csops_common::time;
use csops_server::services::scheduler;

use helpers::{Seed, TestServer};

async fn create_delivery(server: &TestServer, seed: &Seed, title: &str) -> String {
    let (status, body) = server
        .post(
            &format!("/api/companies/{}/deliveries", seed.company.id),
            &seed.owner_token,
            json!({"title": title, "due_date": "2031-06-30"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    assert_eq!(body["status"], "PENDING");
    body["id"].as_str().expect("delivery id").to_string()
}

async fn set_status(server: &TestServer, token: &str, id: &str, status: &str) -> (StatusCode, Value) {
    server
        .patch(&format!("/api/deliveries/{}", id), token, json!({"status": status}))
        .await
}

/// Start the delivery and run it through both approvals
async fn complete_delivery(server: &TestServer, seed: &Seed, id: &str) {
    set_status(server, &seed.owner_token, id, "IN_PROGRESS").await;
    server
        .post(&format!("/api/deliveries/{}/request-approval", id), &seed.owner_token, json!({}))
        .await;
    server
        .post(
            &format!("/api/deliveries/{}/admin-approval", id),
            &seed.admin_token,
            json!({"approved": true}),
        )
        .await;
    let (status, body) = server
        .post(
            &format!("/api/deliveries/{}/client-approval", id),
            &seed.client_token,
            json!({"approved": true}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
}

#[tokio::test]
async fn test_full_approval_flow_schedules_adoption_check() {
    let server = TestServer::start().await;
    let seed = server.seed().await;
    let id = create_delivery(&server, &seed, "Data migration").await;

    let (status, body) = set_status(&server, &seed.owner_token, &id, "IN_PROGRESS").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "IN_PROGRESS");

    // Completion only happens through approvals
    let (status, _) = set_status(&server, &seed.owner_token, &id, "COMPLETED").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = server
        .post(&format!("/api/deliveries/{}/request-approval", id), &seed.owner_token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["admin_approval"], "PENDING");

    // The client cannot decide before the internal approval
    let (status, _) = server
        .post(
            &format!("/api/deliveries/{}/client-approval", id),
            &seed.client_token,
            json!({"approved": true}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = server
        .post(
            &format!("/api/deliveries/{}/admin-approval", id),
            &seed.admin_token,
            json!({"approved": true, "comment": "Looks good"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["admin_approval"], "APPROVED");
    assert_eq!(body["client_approval"], "PENDING");

    // CLIENT_MEMBER users cannot approve on the company's behalf
    let (status, _) = server
        .post(
            &format!("/api/deliveries/{}/client-approval", id),
            &seed.member_token,
            json!({"approved": true}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server
        .post(
            &format!("/api/deliveries/{}/client-approval", id),
            &seed.client_token,
            json!({"approved": true, "comment": "Thanks!"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["progress"], 100);
    assert!(body["completed_at"].is_string());

    // Decision comments land in the thread with their label
    let (_, comments) = server
        .get(&format!("/api/deliveries/{}/comments", id), &seed.owner_token)
        .await;
    let bodies: Vec<&str> = comments
        .as_array()
        .expect("comments array")
        .iter()
        .filter_map(|c| c["body"].as_str())
        .collect();
    assert!(bodies.contains(&"[Approved internally] Looks good"));
    assert!(bodies.contains(&"[Approved by client] Thanks!"));

    // The adoption check is scheduled and hidden from clients until due
    let surveys_path = format!("/api/companies/{}/surveys", seed.company.id);
    let (_, internal) = server.get(&surveys_path, &seed.owner_token).await;
    let internal = internal.as_array().expect("surveys array").clone();
    assert_eq!(internal.len(), 1);
    assert_eq!(internal[0]["kind"], "ADOPTION");
    assert_eq!(internal[0]["status"], "SCHEDULED");
    assert_eq!(internal[0]["delivery_id"], id.as_str());

    let (_, visible) = server.get(&surveys_path, &seed.client_token).await;
    assert_eq!(visible.as_array().map(Vec::len), Some(0));

    let opened = scheduler::run_due_checks(
        &server.state.db,
        &server.state.event_bus,
        time::now() + Duration::days(31),
    )
    .await
    .expect("scheduler run");
    assert_eq!(opened, 1);

    let (_, visible) = server.get(&surveys_path, &seed.client_token).await;
    assert_eq!(visible[0]["status"], "OPEN");
}

#[tokio::test]
async fn test_client_rejection_requires_comment_and_reopens_work() {
    let server = TestServer::start().await;
    let seed = server.seed().await;
    let id = create_delivery(&server, &seed, "Reporting pack").await;

    set_status(&server, &seed.owner_token, &id, "IN_PROGRESS").await;
    server
        .post(&format!("/api/deliveries/{}/request-approval", id), &seed.owner_token, json!({}))
        .await;
    server
        .post(
            &format!("/api/deliveries/{}/admin-approval", id),
            &seed.admin_token,
            json!({"approved": true}),
        )
        .await;

    let path = format!("/api/deliveries/{}/client-approval", id);
    let (status, _) = server.post(&path, &seed.client_token, json!({"approved": false})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .post(&path, &seed.client_token, json!({"approved": false, "comment": "Totals are off"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "IN_PROGRESS");
    assert_eq!(body["client_approval"], "REJECTED");
    assert_eq!(body["admin_approval"], "NOT_REQUESTED");
}

#[tokio::test]
async fn test_blocking_requires_reason_and_reopen_requires_admin() {
    let server = TestServer::start().await;
    let seed = server.seed().await;
    let id = create_delivery(&server, &seed, "Integrations").await;

    let (status, _) = set_status(&server, &seed.owner_token, &id, "BLOCKED").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .patch(
            &format!("/api/deliveries/{}", id),
            &seed.owner_token,
            json!({"status": "BLOCKED", "blocked_reason": "Waiting on API keys"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocked_reason"], "Waiting on API keys");

    // Clients can read but never edit deliveries
    let (status, _) = set_status(&server, &seed.client_token, &id, "IN_PROGRESS").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Re-blocking replaces the reason
    let (status, body) = server
        .patch(
            &format!("/api/deliveries/{}", id),
            &seed.owner_token,
            json!({"status": "BLOCKED", "blocked_reason": "Waiting on legal"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "BLOCKED");
    assert_eq!(body["blocked_reason"], "Waiting on legal");

    let (status, body) = server
        .patch(
            &format!("/api/deliveries/{}", id),
            &seed.owner_token,
            json!({"blocked_reason": "Waiting on procurement"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocked_reason"], "Waiting on procurement");

    let (status, body) = set_status(&server, &seed.owner_token, &id, "IN_PROGRESS").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["blocked_reason"].is_null());
}

#[tokio::test]
async fn test_completed_delivery_keeps_full_progress() {
    let server = TestServer::start().await;
    let seed = server.seed().await;
    let id = create_delivery(&server, &seed, "Analytics rollout").await;
    complete_delivery(&server, &seed, &id).await;
    let path = format!("/api/deliveries/{}", id);

    let (status, body) = server.patch(&path, &seed.owner_token, json!({"progress": 10})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = server.get(&path, &seed.owner_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["progress"], 100);

    // Other fields stay editable
    let (status, body) = server
        .patch(&path, &seed.owner_token, json!({"title": "Analytics rollout (phase 1)", "progress": 100}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Analytics rollout (phase 1)");
}

#[tokio::test]
async fn test_reopen_drops_pending_adoption_check() {
    let server = TestServer::start().await;
    let seed = server.seed().await;
    let id = create_delivery(&server, &seed, "Workflow automation").await;
    complete_delivery(&server, &seed, &id).await;

    let surveys_path = format!("/api/companies/{}/surveys", seed.company.id);
    let (_, scheduled) = server.get(&surveys_path, &seed.owner_token).await;
    assert_eq!(scheduled.as_array().map(Vec::len), Some(1));
    assert_eq!(scheduled[0]["status"], "SCHEDULED");

    // Only admins reopen
    let (status, _) = set_status(&server, &seed.owner_token, &id, "IN_PROGRESS").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server
        .patch(
            &format!("/api/deliveries/{}", id),
            &seed.admin_token,
            json!({"status": "IN_PROGRESS", "progress": 60}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "IN_PROGRESS");
    assert_eq!(body["progress"], 60);
    assert_eq!(body["admin_approval"], "NOT_REQUESTED");
    assert_eq!(body["client_approval"], "NOT_REQUESTED");
    assert!(body["completed_at"].is_null());

    let (_, remaining) = server.get(&surveys_path, &seed.owner_token).await;
    assert_eq!(remaining.as_array().map(Vec::len), Some(0));

    // Nothing left for the scheduler to open
    let opened = scheduler::run_due_checks(
        &server.state.db,
        &server.state.event_bus,
        time::now() + Duration::days(31),
    )
    .await
    .expect("scheduler run");
    assert_eq!(opened, 0);
}

#[tokio::test]
async fn test_dependencies_gate_start_and_reject_cycles() {
    let server = TestServer::start().await;
    let seed = server.seed().await;
    let a = create_delivery(&server, &seed, "Discovery").await;
    let b = create_delivery(&server, &seed, "Build").await;
    let c = create_delivery(&server, &seed, "Launch").await;

    let add = |from: &str, to: &str| {
        (
            format!("/api/deliveries/{}/dependencies", from),
            json!({"depends_on_id": to}),
        )
    };

    let (path, body) = add(&b, &a);
    let (status, _) = server.post(&path, &seed.owner_token, body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = server.post(&path, &seed.owner_token, body).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (path, body) = add(&c, &b);
    let (status, _) = server.post(&path, &seed.owner_token, body).await;
    assert_eq!(status, StatusCode::CREATED);

    // a -> c would close a -> c -> b -> a
    let (path, body) = add(&a, &c);
    let (status, err) = server.post(&path, &seed.owner_token, body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"]["code"], "CONFLICT");

    let (path, body) = add(&a, &a);
    let (status, _) = server.post(&path, &seed.owner_token, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // b cannot start while a is unfinished
    let (status, _) = set_status(&server, &seed.owner_token, &b, "IN_PROGRESS").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = server
        .request(
            axum::http::Method::DELETE,
            &format!("/api/deliveries/{}/dependencies/{}", b, a),
            Some(&seed.owner_token),
            None,
        )
        .await;
    assert!(status.is_success());

    let (status, _) = set_status(&server, &seed.owner_token, &b, "IN_PROGRESS").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_dependencies_stay_within_company() {
    let server = TestServer::start().await;
    let acme = server.seed().await;
    let globex = server.seed_company("globex", "globex.io").await;
    let mine = create_delivery(&server, &acme, "Rollout").await;
    let theirs = create_delivery(&server, &globex, "Rollout").await;

    let (status, _) = server
        .post(
            &format!("/api/deliveries/{}/dependencies", mine),
            &acme.admin_token,
            json!({"depends_on_id": theirs}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
