//! HTTP router tests

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::*;
use election_integrity::api::{router, AppState};
use election_integrity::config::AppConfig;
use election_integrity::database::MemoryStore;

const TOKEN: &str = "operator-secret";

fn app() -> Router {
    let config = AppConfig {
        operator_token: Some(TOKEN.to_string()),
        ..test_config()
    };
    router(AppState::new(config, Arc::new(MemoryStore::new()), test_signer()))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>, authorized: bool) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if authorized {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn vote_body(subject_id: &str) -> Value {
    json!({
        "subject_id": subject_id,
        "election_id": "E-2024",
        "candidate_id": "cand-alpha",
        "timestamp": "2024-11-05T14:30:00Z",
        "voter_id": format!("voter-{}", subject_id),
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/health", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_operator_routes_require_token() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-1")), false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");

    let (status, _) = send(&app, Method::GET, "/ledger/votes/verify", None, false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_record_vote_and_verify_chain() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-1")), true).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["sequence_no"], 1);
    assert_eq!(body["data"]["previous_hash"], "0");

    let (status, body) = send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-2")), true).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["sequence_no"], 2);

    let (status, body) = send(&app, Method::GET, "/ledger/votes/verify", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["total_blocks"], 2);

    let (status, body) = send(&app, Method::GET, "/ledger/votes/verify/incremental", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["checkpoint"]["sequence_no"], 2);
}

#[tokio::test]
async fn test_duplicate_vote_is_bad_request() {
    let app = app();
    send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-1")), true).await;

    let (status, _) = send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-1")), true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_block_listing_and_lookup() {
    let app = app();
    for i in 0..3 {
        send(&app, Method::POST, "/ledger/votes", Some(vote_body(&format!("b-{}", i))), true).await;
    }

    let (status, body) = send(&app, Method::GET, "/ledger/votes/blocks?page=2&limit=2", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["total_pages"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, Method::GET, "/ledger/votes/blocks/b-1", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sequence_no"], 2);

    let (status, _) = send(&app, Method::GET, "/ledger/votes/blocks/missing", None, true).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/ledger/ballots/blocks", None, true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audit_events_recorded() {
    let app = app();
    let event = json!({
        "action_type": "election_opened",
        "entity_type": "election",
        "entity_id": "E-2024",
        "actor_id": "returning-officer",
    });

    let (status, body) = send(&app, Method::POST, "/audit/events", Some(event), true).await;
    assert_eq!(status, StatusCode::CREATED);
    let entry_id = body["data"]["entry_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, &format!("/ledger/audit/blocks/{}", entry_id), None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payload"]["action_type"], "election_opened");
}

#[tokio::test]
async fn test_reference_round_trip_is_public() {
    let app = app();
    send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-1")), true).await;

    let (status, body) = send(&app, Method::POST, "/votes/b-1/reference", None, true).await;
    assert_eq!(status, StatusCode::OK);
    let endpoint = body["data"]["verification_endpoint"].as_str().unwrap().to_string();
    let code = body["data"]["reference_code"].as_str().unwrap().to_string();
    assert_eq!(endpoint, format!("/api/votes/verify/{}", code));

    let (status, body) = send(&app, Method::GET, &format!("/votes/verify/{}", code), None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
    assert!(!body.to_string().contains("cand-alpha"));

    let (status, body) = send(&app, Method::GET, "/votes/verify/FFFFFFFFFFFFFFFF", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], false);
}

#[tokio::test]
async fn test_election_proof_endpoint() {
    let app = app();
    send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-1")), true).await;

    let (status, body) = send(&app, Method::GET, "/votes/election/E-2024/proof", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_votes"], 1);
    assert_eq!(body["data"]["chain_valid"], true);
    assert_eq!(body["data"]["public_key"], test_signer().public_key_hex());
}

#[tokio::test]
async fn test_transparency_routes() {
    let app = app();
    let today = Utc::now().format("%Y-%m-%d").to_string();

    let (status, _) = send(&app, Method::POST, &format!("/transparency/votes/merkle-root/{}", today), None, true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, window) = yesterday();
    let (status, body) = send(&app, Method::POST, &format!("/transparency/votes/merkle-root/{}", window), None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "no_records");

    let (status, _) = send(&app, Method::GET, &format!("/transparency/votes/merkle-root/{}", window), None, false).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::GET, "/transparency/merkle-roots", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);

    let (status, body) = send(&app, Method::GET, "/transparency/public-key", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["public_key"], test_signer().public_key_hex());

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/transparency/votes/merkle-root/{}/override", window),
        Some(json!({"actor_id": "returning-officer", "reason": "recount"})),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_state_changing_calls_are_audited() {
    let app = app();
    let (_, window) = yesterday();

    send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-1")), true).await;
    send(&app, Method::POST, "/votes/b-1/reference", None, true).await;
    send(&app, Method::POST, &format!("/transparency/votes/merkle-root/{}", window), None, true).await;
    send(&app, Method::GET, "/ledger/votes/verify", None, true).await;
    send(&app, Method::POST, "/ledger/votes", Some(vote_body("b-2")), false).await;

    let (status, body) = send(&app, Method::GET, "/ledger/audit/blocks", None, true).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"]["items"].as_array().unwrap();
    let actions: Vec<&str> = entries
        .iter()
        .map(|entry| entry["payload"]["action_type"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["record_vote", "issue_vote_reference", "publish_merkle_root"]);

    let reference = &entries[1]["payload"];
    assert_eq!(reference["entity_id"], "b-1");
    assert_eq!(reference["actor_id"], "operator");
    assert_eq!(reference["details"]["status_code"], 200);
    assert_eq!(entries[2]["payload"]["entity_id"], format!("votes:{}", window));

    let (_, body) = send(&app, Method::GET, "/ledger/audit/verify", None, true).await;
    assert_eq!(body["data"]["valid"], true);
}

#[tokio::test]
async fn test_audit_listing_filters() {
    let app = app();
    for (action, entity, timestamp) in [
        ("election_opened", "election", "2024-11-05T07:00:00Z"),
        ("ballot_box_sealed", "ballot_box", "2024-11-05T19:00:00Z"),
        ("election_closed", "election", "2024-11-05T20:00:00Z"),
    ] {
        let event = json!({"action_type": action, "entity_type": entity, "timestamp": timestamp});
        send(&app, Method::POST, "/audit/events", Some(event), true).await;
    }

    let (status, body) = send(&app, Method::GET, "/ledger/audit/blocks?entity_type=election", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["items"][0]["sequence_no"], 1);
    assert_eq!(body["data"]["items"][1]["sequence_no"], 3);

    let (_, body) = send(
        &app,
        Method::GET,
        "/ledger/audit/blocks?start_date=2024-11-05T12:00:00Z&end_date=2024-11-05T19:00:00Z",
        None,
        true,
    )
    .await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["payload"]["action_type"], "ballot_box_sealed");

    let (status, body) = send(&app, Method::GET, "/ledger/audit/blocks?start_date=yesterday", None, true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = send(&app, Method::GET, "/ledger/votes/blocks?action_type=record_vote", None, true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_gets_error_envelope() {
    let app = app();
    let (status, body) = send(&app, Method::POST, "/ledger/votes", Some(json!({"subject_id": "b-1"})), true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().unwrap().starts_with("Validation error: Invalid request body"));
}
