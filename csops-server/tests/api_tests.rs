//! Integration tests for csops-server API endpoints
//!
//! Tests cover:
//! - Health endpoint (no auth required)
//! - Login, session tokens and role checks
//! - Tenant isolation for companies
//! - Notifications and the dashboard
//! - Persistence across restarts with a file-backed database

mod helpers;

use axum::http::{Method, StatusCode};
use serde_json::json;

use csops_common::db::init_database;
use tempfile::TempDir;

use helpers::TestServer;

// =============================================================================
// Health Endpoint
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let server = TestServer::start().await;

    let (status, body) = server.request(Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "csops-server");
    assert!(body["version"].is_string());
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_login_issues_usable_token() {
    let server = TestServer::start().await;
    let seed = server.seed().await;

    let (status, body) = server
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "LEAD@acme.com", "password": helpers::test_server::PASSWORD})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], seed.client.id.as_str());
    assert!(body["user"].get("password_hash").is_none());

    let token = body["token"].as_str().expect("token should be a string");
    let (status, me) = server.get("/api/auth/me", token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["principal"]["role"], "CLIENT");
    assert_eq!(me["principal"]["company_id"], seed.company.id.as_str());
}

#[tokio::test]
async fn test_login_rejects_wrong_password() {
    let server = TestServer::start().await;
    server.seed().await;

    let (status, body) = server
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "lead@acme.com", "password": "wrong password"})),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_missing_and_garbage_tokens_are_rejected() {
    let server = TestServer::start().await;

    let (status, _) = server.request(Method::GET, "/api/companies", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server.get("/api/companies", "not-a-jwt").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deactivated_user_loses_access() {
    let server = TestServer::start().await;
    let seed = server.seed().await;

    let (status, _) = server
        .patch(
            &format!("/api/users/{}", seed.member.id),
            &seed.admin_token,
            json!({"active": false}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server.get("/api/auth/me", &seed.member_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Tenant isolation
// =============================================================================

#[tokio::test]
async fn test_clients_only_see_their_own_company() {
    let server = TestServer::start().await;
    let acme = server.seed().await;
    let globex = server.seed_company("globex", "globex.io").await;

    let (status, body) = server.get("/api/companies", &acme.client_token).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body["companies"].as_array().expect("companies array");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], acme.company.id.as_str());

    // Another tenant's company looks like it does not exist
    let (status, _) = server
        .get(&format!("/api/companies/{}", globex.company.id), &acme.client_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = server.get("/api/companies", &acme.admin_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 2);
}

#[tokio::test]
async fn test_cs_owner_sees_only_owned_companies() {
    let server = TestServer::start().await;
    let acme = server.seed().await;
    let globex = server.seed_company("globex", "globex.io").await;

    let (status, _) = server
        .get(&format!("/api/companies/{}", acme.company.id), &acme.owner_token)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .get(&format!("/api/companies/{}", globex.company.id), &acme.owner_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_only_admins_create_companies() {
    let server = TestServer::start().await;
    let seed = server.seed().await;

    let (status, body) = server
        .post("/api/companies", &seed.owner_token, json!({"name": "Initech"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, body) = server
        .post(
            "/api/companies",
            &seed.admin_token,
            json!({"name": "Initech", "domain": "@Initech.COM"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["domain"], "initech.com");
    assert_eq!(body["onboarding_step"], "WELCOME");
}

// =============================================================================
// Notifications and dashboard
// =============================================================================

#[tokio::test]
async fn test_client_comment_notifies_cs_owner() {
    let server = TestServer::start().await;
    let seed = server.seed().await;

    let (status, delivery) = server
        .post(
            &format!("/api/companies/{}/deliveries", seed.company.id),
            &seed.owner_token,
            json!({"title": "SSO rollout"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let delivery_id = delivery["id"].as_str().expect("delivery id");

    let (status, _) = server
        .post(
            &format!("/api/deliveries/{}/comments", delivery_id),
            &seed.client_token,
            json!({"body": "Can we move this up?"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = server.get("/api/notifications", &seed.owner_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unread_count"], 1);
    let notification_id = body["notifications"][0]["id"].as_str().expect("notification id").to_string();

    // Another user's notification is not addressable
    let (status, _) = server
        .post(
            &format!("/api/notifications/{}/read", notification_id),
            &seed.client_token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = server
        .post(
            &format!("/api/notifications/{}/read", notification_id),
            &seed.owner_token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unread_count"], 0);
}

#[tokio::test]
async fn test_dashboard_is_internal_only() {
    let server = TestServer::start().await;
    let seed = server.seed().await;

    let (status, body) = server.get("/api/dashboard", &seed.admin_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deliveries_by_status"]["PENDING"], 0);
    assert!(body["companies_by_health"].is_object());

    let (status, _) = server.get("/api/dashboard", &seed.client_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server.get("/api/client/overview", &seed.member_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["company"]["id"], seed.company.id.as_str());
    assert!(body["onboarding"].is_array());
}

#[tokio::test]
async fn test_read_all_clears_unread_notifications() {
    let server = TestServer::start().await;
    let seed = server.seed().await;

    let (_, delivery) = server
        .post(
            &format!("/api/companies/{}/deliveries", seed.company.id),
            &seed.owner_token,
            json!({"title": "Data migration"}),
        )
        .await;
    let comments_path = format!("/api/deliveries/{}/comments", delivery["id"].as_str().expect("id"));
    for body in ["First question", "Second question"] {
        let (status, _) = server
            .post(&comments_path, &seed.client_token, json!({"body": body}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = server.get("/api/notifications", &seed.owner_token).await;
    assert_eq!(body["unread_count"], 2);

    // Nothing of the client's own to mark
    let (status, body) = server
        .post("/api/notifications/read-all", &seed.client_token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["marked"], 0);

    let (status, body) = server
        .post("/api/notifications/read-all", &seed.owner_token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["marked"], 2);
    assert_eq!(body["unread_count"], 0);

    let (_, body) = server
        .get("/api/notifications?unread_only=true", &seed.owner_token)
        .await;
    assert_eq!(body["unread_count"], 0);
    assert_eq!(body["notifications"].as_array().map(Vec::len), Some(0));

    // Read notifications are still listed
    let (_, body) = server.get("/api/notifications", &seed.owner_token).await;
    assert_eq!(body["notifications"].as_array().map(Vec::len), Some(2));
}

// =============================================================================
// File-backed database
// =============================================================================

#[tokio::test]
async fn test_data_survives_restart() {
    let temp_dir = TempDir::new().expect("Should create temp dir");
    let db_path = temp_dir.path().join("csops.db");

    let db = init_database(&db_path).await.expect("Should create database");
    let server = TestServer::with_database(db.clone());
    let seed = server.seed().await;
    let (status, created) = server
        .post(
            "/api/companies",
            &seed.admin_token,
            json!({"name": "Initech", "domain": "initech.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    drop(server);
    db.close().await;

    let db = init_database(&db_path).await.expect("Should reopen database");
    let server = TestServer::with_database(db);

    // Same signing secret, so the earlier session is still valid
    let (status, company) = server
        .get(
            &format!("/api/companies/{}", created["id"].as_str().expect("company id")),
            &seed.admin_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(company["name"], "Initech");
    assert_eq!(company["domain"], "initech.com");
}
