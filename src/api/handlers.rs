use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::api::{AppState, Operator};
use crate::audit::entry::AuditEvent;
use crate::database::models::AuditFilter;
use crate::error::{IntegrityError, Result};
use crate::integrity::publisher::{Publication, RootOverride};
use crate::ledger::block::ChainKind;
use crate::ledger::vote::VoteCast;

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

fn success<T: Serialize>(data: T) -> Result<Json<Value>> {
    Ok(Json(json!({
        "status": "success",
        "data": serde_json::to_value(data)?,
    })))
}

fn parse_chain(chain: &str) -> Result<ChainKind> {
    chain.parse()
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "election-integrity",
        "timestamp": chrono::Utc::now()
    }))
}

pub async fn record_vote(
    _: Operator,
    State(state): State<AppState>,
    body: std::result::Result<Json<VoteCast>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>)> {
    let Json(cast) = body?;
    let block = state.votes.record_vote(cast).await?;
    let body = success(json!({
        "sequence_no": block.sequence_no,
        "subject_id": block.subject_id,
        "block_hash": block.block_hash,
        "previous_hash": block.previous_hash,
        "created_at": block.created_at,
    }))?;
    Ok((StatusCode::CREATED, body))
}

pub async fn record_audit_event(
    _: Operator,
    State(state): State<AppState>,
    body: std::result::Result<Json<AuditEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>)> {
    let Json(event) = body?;
    let block = state.audit.record(event).await?;
    let body = success(json!({
        "sequence_no": block.sequence_no,
        "entry_id": block.payload.entry_id,
        "block_hash": block.block_hash,
        "previous_hash": block.previous_hash,
    }))?;
    Ok((StatusCode::CREATED, body))
}

pub async fn verify_chain(
    _: Operator,
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> Result<Json<Value>> {
    let report = state.verifier.verify(parse_chain(&chain)?).await?;
    success(report)
}

pub async fn verify_chain_incremental(
    _: Operator,
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> Result<Json<Value>> {
    let report = state.verifier.verify_incremental(parse_chain(&chain)?).await?;
    success(report)
}

pub async fn list_blocks(
    _: Operator,
    State(state): State<AppState>,
    Path(chain): Path<String>,
    pagination: std::result::Result<Query<Pagination>, QueryRejection>,
    filter: std::result::Result<Query<AuditFilter>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(pagination) = pagination?;
    let Query(filter) = filter?;
    let max = state.config.max_page_size;
    match parse_chain(&chain)? {
        ChainKind::Votes if !filter.is_empty() => Err(IntegrityError::ValidationError(
            "entity_type, action_type, start_date and end_date apply to the audit chain only".to_string(),
        )),
        ChainKind::Votes => success(state.votes.get_page(pagination.page, pagination.limit, max).await?),
        ChainKind::Audit => success(
            state
                .audit
                .search(&filter, pagination.page, pagination.limit, max)
                .await?,
        ),
    }
}

pub async fn get_block(
    _: Operator,
    State(state): State<AppState>,
    Path((chain, subject_id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    match parse_chain(&chain)? {
        ChainKind::Votes => success(state.votes.get_by_subject_id(&subject_id).await?),
        ChainKind::Audit => success(state.audit.get_by_subject_id(&subject_id).await?),
    }
}

pub async fn issue_reference(
    _: Operator,
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<Json<Value>> {
    success(state.references.issue_reference(&subject_id).await?)
}

pub async fn verify_reference(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Value>> {
    success(state.references.verify_reference(&code).await?)
}

pub async fn election_proof(
    _: Operator,
    State(state): State<AppState>,
    Path(election_id): Path<String>,
) -> Result<Json<Value>> {
    success(state.proofs.build_proof(&election_id).await?)
}

pub async fn publish_root(
    _: Operator,
    State(state): State<AppState>,
    Path((chain, window)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Value>)> {
    let publication = state.publisher.publish(parse_chain(&chain)?, &window).await?;
    let status = match publication {
        Publication::Published(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, success(publication)?))
}

pub async fn override_root(
    _: Operator,
    State(state): State<AppState>,
    Path((chain, window)): Path<(String, String)>,
    body: std::result::Result<Json<RootOverride>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>)> {
    let Json(authorization) = body?;
    info!(
        "Root override requested for {} {} by {}",
        chain, window, authorization.actor_id
    );
    let publication = state
        .publisher
        .republish(parse_chain(&chain)?, &window, authorization)
        .await?;
    let status = match publication {
        Publication::Published(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, success(publication)?))
}

pub async fn latest_root(
    State(state): State<AppState>,
    Path((chain, window)): Path<(String, String)>,
) -> Result<Json<Value>> {
    success(state.publisher.latest(parse_chain(&chain)?, &window).await?)
}

pub async fn root_history(
    State(state): State<AppState>,
    Path((chain, window)): Path<(String, String)>,
) -> Result<Json<Value>> {
    success(state.publisher.history(parse_chain(&chain)?, &window).await?)
}

pub async fn list_roots(
    State(state): State<AppState>,
    pagination: std::result::Result<Query<Pagination>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(pagination) = pagination?;
    success(
        state
            .publisher
            .list(pagination.page, pagination.limit, state.config.max_page_size)
            .await?,
    )
}

pub async fn public_key(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": {
            "algorithm": "secp256k1-ecdsa-sha256",
            "public_key": state.signer.public_key_hex(),
        }
    }))
}
