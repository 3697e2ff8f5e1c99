//! Provider webhook integration tests
//!
//! Tests cover:
//! - Cal.com and Calendly signature verification
//! - Booking upsert and company resolution (user email, then domain)
//! - Cancellation events and ignored triggers

mod helpers;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};

use csops_common::{time, webhook};
use csops_server::api::webhooks::{CALCOM_SIGNATURE_HEADER, CALENDLY_SIGNATURE_HEADER};

use helpers::{TestServer, CALCOM_SECRET, CALENDLY_KEY};

fn calcom_body(trigger: &str, uid: &str, email: &str) -> String {
    json!({
        "triggerEvent": trigger,
        "createdAt": "2031-01-02T09:00:00Z",
        "payload": {
            "uid": uid,
            "title": "Kickoff call",
            "startTime": "2031-01-10T15:00:00Z",
            "endTime": "2031-01-10T15:30:00Z",
            "status": "accepted",
            "attendees": [{"email": email, "name": "Lea"}],
            "metadata": {"videoCallUrl": "https://meet.example.com/abc"}
        }
    })
    .to_string()
}

fn calendly_body(event: &str, invitee_uri: &str, email: &str) -> String {
    json!({
        "event": event,
        "payload": {
            "uri": invitee_uri,
            "email": email,
            "name": "Sam",
            "scheduled_event": {
                "uri": "https://api.calendly.com/scheduled_events/EV1",
                "name": "Quarterly review",
                "start_time": "2031-02-01T10:00:00.000000Z",
                "end_time": "2031-02-01T11:00:00.000000Z",
                "location": {"join_url": "https://zoom.example.com/j/1"}
            }
        }
    })
    .to_string()
}

fn webhook_request(path: &str, signature: Option<(&str, String)>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some((name, value)) = signature {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body)).expect("Should build request")
}

async fn post_calcom(server: &TestServer, body: String) -> (StatusCode, Value) {
    let signature = webhook::sign_hex(CALCOM_SECRET, body.as_bytes());
    server
        .send(webhook_request(
            "/api/webhooks/calcom",
            Some((CALCOM_SIGNATURE_HEADER, signature)),
            body,
        ))
        .await
}

#[tokio::test]
async fn test_calcom_booking_is_attached_to_client_company() {
    let server = TestServer::start().await;
    let seed = server.seed().await;

    let (status, ack) = post_calcom(&server, calcom_body("BOOKING_CREATED", "cal-1", "lead@acme.com")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    assert!(ack["booking_id"].is_string());

    let (status, bookings) = server
        .get(&format!("/api/companies/{}/bookings", seed.company.id), &seed.owner_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let bookings = bookings.as_array().expect("bookings array");
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0]["provider"], "CALCOM");
    assert_eq!(bookings[0]["external_id"], "cal-1");
    assert_eq!(bookings[0]["status"], "ACCEPTED");
    assert_eq!(bookings[0]["meeting_url"], "https://meet.example.com/abc");
}

#[tokio::test]
async fn test_calcom_redelivery_updates_instead_of_duplicating() {
    let server = TestServer::start().await;
    let seed = server.seed().await;

    // Unknown user, company found through the email domain
    let (_, first) = post_calcom(&server, calcom_body("BOOKING_CREATED", "cal-2", "cfo@acme.com")).await;
    let (_, second) = post_calcom(&server, calcom_body("BOOKING_CANCELLED", "cal-2", "cfo@acme.com")).await;
    assert_eq!(first["booking_id"], second["booking_id"]);

    let (_, bookings) = server
        .get(&format!("/api/companies/{}/bookings", seed.company.id), &seed.admin_token)
        .await;
    let bookings = bookings.as_array().expect("bookings array");
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0]["status"], "CANCELLED");
}

#[tokio::test]
async fn test_calcom_rejects_bad_or_missing_signature() {
    let server = TestServer::start().await;
    server.seed().await;
    let body = calcom_body("BOOKING_CREATED", "cal-3", "lead@acme.com");

    let (status, _) = server
        .send(webhook_request("/api/webhooks/calcom", None, body.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = webhook::sign_hex("some-other-secret", body.as_bytes());
    let (status, _) = server
        .send(webhook_request(
            "/api/webhooks/calcom",
            Some((CALCOM_SIGNATURE_HEADER, forged)),
            body.clone(),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signature over a different payload
    let signature = webhook::sign_hex(CALCOM_SECRET, body.as_bytes());
    let tampered = body.replace("cal-3", "cal-4");
    let (status, _) = server
        .send(webhook_request(
            "/api/webhooks/calcom",
            Some((CALCOM_SIGNATURE_HEADER, signature)),
            tampered,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_calcom_ignores_unhandled_triggers() {
    let server = TestServer::start().await;

    let (status, ack) = post_calcom(&server, calcom_body("MEETING_ENDED", "cal-5", "lead@acme.com")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    assert!(ack["booking_id"].is_null());
}

#[tokio::test]
async fn test_signed_garbage_is_bad_request() {
    let server = TestServer::start().await;

    let (status, _) = post_calcom(&server, "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_calendly_webhook_with_fresh_signature() {
    let server = TestServer::start().await;
    let seed = server.seed().await;
    let body = calendly_body(
        "invitee.created",
        "https://api.calendly.com/scheduled_events/EV1/invitees/INV1",
        "member@acme.com",
    );
    let header_value = webhook::calendly_header(CALENDLY_KEY, body.as_bytes(), time::now().timestamp());

    let (status, ack) = server
        .send(webhook_request(
            "/api/webhooks/calendly",
            Some((CALENDLY_SIGNATURE_HEADER, header_value)),
            body,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(ack["booking_id"].is_string());

    let (_, bookings) = server
        .get(&format!("/api/companies/{}/bookings", seed.company.id), &seed.client_token)
        .await;
    assert_eq!(bookings[0]["provider"], "CALENDLY");
    assert_eq!(bookings[0]["status"], "ACTIVE");
    assert_eq!(bookings[0]["meeting_url"], "https://zoom.example.com/j/1");
}

#[tokio::test]
async fn test_calendly_rejects_stale_signature() {
    let server = TestServer::start().await;
    let body = calendly_body(
        "invitee.created",
        "https://api.calendly.com/scheduled_events/EV1/invitees/INV2",
        "member@acme.com",
    );
    let an_hour_ago = time::now().timestamp() - 3600;
    let header_value = webhook::calendly_header(CALENDLY_KEY, body.as_bytes(), an_hour_ago);

    let (status, _) = server
        .send(webhook_request(
            "/api/webhooks/calendly",
            Some((CALENDLY_SIGNATURE_HEADER, header_value)),
            body,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_booking_links_to_delivery_in_same_company() {
    let server = TestServer::start().await;
    let seed = server.seed().await;
    let (_, ack) = post_calcom(&server, calcom_body("BOOKING_CREATED", "cal-6", "lead@acme.com")).await;
    let booking_id = ack["booking_id"].as_str().expect("booking id").to_string();

    let (_, delivery) = server
        .post(
            &format!("/api/companies/{}/deliveries", seed.company.id),
            &seed.owner_token,
            json!({"title": "Kickoff"}),
        )
        .await;
    let meetings_path = format!("/api/deliveries/{}/meetings", delivery["id"].as_str().expect("id"));

    let link = json!({"provider": "CALCOM", "booking_id": booking_id});
    let (status, _) = server.post(&meetings_path, &seed.owner_token, link.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = server.post(&meetings_path, &seed.owner_token, link).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, meetings) = server.get(&meetings_path, &seed.client_token).await;
    assert_eq!(meetings.as_array().map(Vec::len), Some(1));
}
