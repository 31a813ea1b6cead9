//! Audit trail for state-changing API calls.
//!
//! Every non-read request that gets past operator authentication is written
//! to the audit chain once the handler has answered, whatever the outcome.
//! `POST /audit/events` is skipped because it already appends to that chain.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::api::AppState;
use crate::audit::entry::AuditEvent;

pub const AUDIT_EVENTS_ROUTE: &str = "/audit/events";

/// Action and entity names for a matched route.
fn classify(method: &Method, route: &str) -> (&'static str, &'static str) {
    match route {
        "/ledger/votes" => ("record_vote", "vote"),
        "/votes/:subject_id/reference" => ("issue_vote_reference", "vote_reference"),
        "/transparency/:chain/merkle-root/:window" => ("publish_merkle_root", "merkle_root"),
        "/transparency/:chain/merkle-root/:window/override" => ("override_merkle_root", "merkle_root"),
        _ => {
            let action = match *method {
                Method::POST => "create",
                Method::PUT | Method::PATCH => "update",
                Method::DELETE => "delete",
                _ => "unknown",
            };
            (action, "unknown")
        }
    }
}

/// Subject of the call, taken from the concrete path.
fn entity_id(route: &str, path: &str) -> Option<String> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match route {
        "/votes/:subject_id/reference" => segments.get(1).map(|subject| subject.to_string()),
        "/transparency/:chain/merkle-root/:window" | "/transparency/:chain/merkle-root/:window/override" => {
            match (segments.get(1), segments.get(3)) {
                (Some(chain), Some(window)) => Some(format!("{}:{}", chain, window)),
                _ => None,
            }
        }
        _ => None,
    }
}

pub fn mutation_event(
    method: &Method,
    route: &str,
    path: &str,
    status: StatusCode,
    elapsed: Duration,
    operator: bool,
) -> AuditEvent {
    let (action, entity) = classify(method, route);
    let mut event = AuditEvent::new(action, entity).details(json!({
        "method": method.as_str(),
        "path": path,
        "status_code": status.as_u16(),
        "response_time_ms": elapsed.as_millis() as u64,
    }));
    if let Some(id) = entity_id(route, path) {
        event = event.entity(id);
    }
    if operator {
        event = event.actor("operator");
    }
    event
}

pub async fn record_mutations(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if matches!(method, Method::GET | Method::HEAD | Method::OPTIONS) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || route == AUDIT_EVENTS_ROUTE {
        return response;
    }

    let event = mutation_event(
        &method,
        &route,
        &path,
        status,
        started.elapsed(),
        state.config.operator_token.is_some(),
    );
    match state.audit.record(event).await {
        Ok(block) => debug!("Audited {} {} as audit block #{}", method, path, block.sequence_no),
        Err(e) => error!("Failed to audit {} {}: {}", method, path, e),
    }
    response
}
