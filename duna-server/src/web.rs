//! HTTP API.
//!
//! CRUD over DUNA records plus the contract pipeline trigger. Errors are
//! returned as `{"error": "..."}` with a status chosen per error kind.
//! Generation, deployment and store failures report only their kind; the
//! full error, which may quote upstream responses, is logged.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::StoreError;
use crate::id;
use crate::pipeline::{Deployment, PipelineError};
use crate::prompt;
use crate::record::{DunaRecord, NewRecord, RecordPatch};
use crate::server::SharedState;

/// Build the axum router.
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(api_health))
        .route("/duna", get(list_records).post(create_record))
        .route(
            "/duna/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/duna/{id}/generate-contract", post(generate_contract))
        .route("/duna/{id}/contract-source", get(contract_source))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("DUNA record {id} not found"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Invalid(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            e => {
                tracing::error!(error = %e, "Record store error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "record store error")
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        // Upstream response bodies and node messages stay in the log.
        let (status, message) = match &e {
            PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
            PipelineError::AlreadyProcessed(_) => (StatusCode::BAD_REQUEST, e.to_string()),
            PipelineError::InProgress(_) => (StatusCode::CONFLICT, e.to_string()),
            // diagnostics come from the local compiler and describe the source
            PipelineError::Compilation(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            PipelineError::Generation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "contract generation failed".to_string(),
            ),
            PipelineError::Deployment(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "contract deployment failed".to_string(),
            ),
            PipelineError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "record store error".to_string(),
            ),
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "Contract pipeline failed");
        }
        Self::new(status, message)
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Reject ids that cannot exist before touching the store.
fn check_id(id: &str) -> ApiResult<()> {
    if id::is_record_id(id) {
        Ok(())
    } else {
        Err(ApiError::not_found(id))
    }
}

// ── Handlers ───────────────────────────────────────────────────────────

async fn api_health(State(state): State<Arc<SharedState>>) -> ApiResult<impl IntoResponse> {
    let records = state.store.count()?;
    Ok(Json(json!({
        "status": "ok",
        "records": records,
        "sourceTransform": state.pipeline.transform().as_str(),
    })))
}

async fn list_records(State(state): State<Arc<SharedState>>) -> ApiResult<Json<Vec<DunaRecord>>> {
    Ok(Json(state.store.list()?))
}

async fn create_record(
    State(state): State<Arc<SharedState>>,
    Json(new): Json<NewRecord>,
) -> ApiResult<(StatusCode, Json<DunaRecord>)> {
    let record = state.store.insert(new)?;
    tracing::info!(record_id = %record.id, name = %record.name, "DUNA record created");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_record(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DunaRecord>> {
    check_id(&id)?;
    state
        .store
        .get(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&id))
}

async fn update_record(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
    Json(patch): Json<RecordPatch>,
) -> ApiResult<Json<DunaRecord>> {
    check_id(&id)?;
    state
        .store
        .update(&id, patch)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&id))
}

async fn delete_record(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    check_id(&id)?;
    if state.store.delete(&id)? {
        tracing::info!(record_id = %id, "DUNA record deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(&id))
    }
}

async fn generate_contract(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Deployment>> {
    check_id(&id)?;
    // Run detached so a client that hangs up mid-deployment cannot cancel
    // the run between submitting the transaction and recording it.
    let pipeline = Arc::clone(&state.pipeline);
    let task = tokio::spawn(async move { pipeline.run(&id).await });
    match task.await {
        Ok(result) => Ok(Json(result?)),
        Err(e) => {
            tracing::error!(error = %e, "Contract pipeline task failed");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "contract pipeline aborted",
            ))
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContractSource {
    contract_name: String,
    source: String,
}

async fn contract_source(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ContractSource>> {
    check_id(&id)?;
    let record = state
        .store
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(&id))?;
    if !record.contract_generated {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no contract generated for DUNA record {id}"),
        ));
    }
    Ok(Json(ContractSource {
        contract_name: prompt::contract_name(&record.name),
        source: record.source_transform.decode(&record.contract_source),
    }))
}
