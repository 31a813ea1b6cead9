//! HTTP surface
//!
//! Operator routes require the configured bearer token. Reference
//! verification and published roots stay public.

pub mod audit_trail;
pub mod handlers;

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts,
    },
    http::{header, request::Parts, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::audit::logger::AuditLogChain;
use crate::config::AppConfig;
use crate::crypto::signatures::ProofSigner;
use crate::database::LedgerStore;
use crate::error::IntegrityError;
use crate::integrity::publisher::MerklePublisher;
use crate::integrity::verify::IntegrityVerifier;
use crate::ledger::chain::VoteLedger;
use crate::verification::{ElectionProofService, VoteReferenceService};

/// Shared services behind the router. Each ledger owns its chain's append
/// lock, so there must be exactly one `AppState` per store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub votes: Arc<VoteLedger>,
    pub audit: Arc<AuditLogChain>,
    pub verifier: IntegrityVerifier,
    pub publisher: Arc<MerklePublisher>,
    pub references: Arc<VoteReferenceService>,
    pub proofs: Arc<ElectionProofService>,
    pub signer: Arc<ProofSigner>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn LedgerStore>, signer: ProofSigner) -> Self {
        let signer = Arc::new(signer);
        let votes = Arc::new(VoteLedger::new(store.clone(), config.max_append_retries));
        let audit = Arc::new(AuditLogChain::new(store.clone(), config.max_append_retries));

        Self {
            verifier: IntegrityVerifier::new(store.clone(), config.verify_batch_size),
            publisher: Arc::new(
                MerklePublisher::new(store.clone(), signer.clone(), audit.clone())
                    .with_settle_margin(Duration::seconds(config.merkle_settle_secs as i64)),
            ),
            references: Arc::new(VoteReferenceService::new(
                store.clone(),
                config.verification_base_path.clone(),
            )),
            proofs: Arc::new(ElectionProofService::new(store, signer.clone())),
            config: Arc::new(config),
            votes,
            audit,
            signer,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ledger/votes", post(handlers::record_vote))
        .route("/audit/events", post(handlers::record_audit_event))
        .route("/ledger/:chain/verify", get(handlers::verify_chain))
        .route("/ledger/:chain/verify/incremental", get(handlers::verify_chain_incremental))
        .route("/ledger/:chain/blocks", get(handlers::list_blocks))
        .route("/ledger/:chain/blocks/:subject_id", get(handlers::get_block))
        .route("/votes/:subject_id/reference", post(handlers::issue_reference))
        .route("/votes/verify/:code", get(handlers::verify_reference))
        .route("/votes/election/:election_id/proof", get(handlers::election_proof))
        .route(
            "/transparency/:chain/merkle-root/:window",
            get(handlers::latest_root).post(handlers::publish_root),
        )
        .route(
            "/transparency/:chain/merkle-root/:window/override",
            post(handlers::override_root),
        )
        .route(
            "/transparency/:chain/merkle-root/:window/history",
            get(handlers::root_history),
        )
        .route("/transparency/merkle-roots", get(handlers::list_roots))
        .route("/transparency/public-key", get(handlers::public_key))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            audit_trail::record_mutations,
        ))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).into_inner())
        .with_state(state)
}

/// Extractor that admits a request only with the operator bearer token.
/// Every request is admitted when no token is configured.
pub struct Operator;

#[async_trait]
impl FromRequestParts<AppState> for Operator {
    type Rejection = IntegrityError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.operator_token.as_deref() else {
            return Ok(Operator);
        };

        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match presented {
            Some(token) if token == expected => Ok(Operator),
            _ => {
                warn!("Rejected operator request to {}", parts.uri.path());
                Err(IntegrityError::Unauthorized("Operator token required".to_string()))
            }
        }
    }
}

impl From<JsonRejection> for IntegrityError {
    fn from(rejection: JsonRejection) -> Self {
        IntegrityError::ValidationError(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for IntegrityError {
    fn from(rejection: QueryRejection) -> Self {
        IntegrityError::ValidationError(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl IntegrityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IntegrityError::ValidationError(_) => StatusCode::BAD_REQUEST,
            IntegrityError::NotFound(_) => StatusCode::NOT_FOUND,
            IntegrityError::IntegrityViolation { .. } => StatusCode::CONFLICT,
            IntegrityError::ConcurrencyConflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            IntegrityError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            IntegrityError::DatabaseError(_)
            | IntegrityError::CryptoError(_)
            | IntegrityError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IntegrityError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let sequence_no = match &self {
            IntegrityError::IntegrityViolation { sequence_no, .. } => *sequence_no,
            _ => None,
        };
        let body = json!({
            "status": "error",
            "error": self.to_string(),
            "sequence_no": sequence_no,
        });
        (status, Json(body)).into_response()
    }
}
