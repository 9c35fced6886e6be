//! JSON API for the proposal lifecycle.
//!
//! - `POST /api/v1/numbers`                   allocate a proposal number
//! - `POST /api/v1/proposals`                 create a proposal
//! - `GET  /api/v1/proposals/{id}`            load a proposal
//! - `PUT  /api/v1/proposals/{id}`            update a proposal
//! - `GET  /api/v1/proposals/{id}/revisions`  revision log, oldest first
//! - `POST /api/v1/approvals`                 request a discount approval
//! - `GET  /api/v1/approvals`                 list approvals (`proposal_id`, `status`)
//! - `POST /api/v1/approvals/{id}/decision`   approve or reject
//!
//! The acting user always travels in the request body.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use propline_core::approvals::GateDecision;
use propline_core::audit::RequestContext;
use propline_core::domain::approval::{ApprovalDecision, ApprovalId, ApprovalRecord, ApprovalStatus};
use propline_core::domain::directory::{ClientId, UserId};
use propline_core::domain::proposal::{Proposal, ProposalId, ProposalStatus, ProposalTotals};
use propline_core::domain::revision::RevisionRecord;
use propline_core::errors::{ApplicationError, InterfaceError};
use propline_core::lifecycle::{NewProposal, ProposalChanges, ProposalLifecycle};
use propline_core::numbering::NumberResult;
use propline_core::store::ApprovalFilter;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    lifecycle: Arc<ProposalLifecycle>,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateNumberRequest {
    pub client_id: ClientId,
    #[serde(default)]
    pub responsible_user_id: Option<UserId>,
    #[serde(default)]
    pub revision_index: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    pub actor: UserId,
    #[serde(flatten)]
    pub proposal: NewProposal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProposalRequest {
    pub actor: UserId,
    #[serde(default)]
    pub requested_status: Option<ProposalStatus>,
    #[serde(default)]
    pub expected_revision: Option<u32>,
    #[serde(flatten)]
    pub changes: ProposalChanges,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestApprovalRequest {
    pub proposal_id: ProposalId,
    pub discount_percent: Decimal,
    pub requested_by: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideApprovalRequest {
    pub decision: ApprovalDecision,
    pub decided_by: UserId,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListApprovalsQuery {
    pub proposal_id: Option<String>,
    pub status: Option<String>,
}

/// A stored proposal plus its derived `total` and `netTotal`.
#[derive(Debug, Serialize)]
pub struct ProposalView {
    #[serde(flatten)]
    pub proposal: Proposal,
    #[serde(flatten)]
    pub totals: ProposalTotals,
}

impl ProposalView {
    fn new(proposal: Proposal) -> Result<Self, ApplicationError> {
        let totals = proposal.totals()?;
        Ok(Self { proposal, totals })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalResponse {
    pub proposal: ProposalView,
    pub revision: u32,
    pub decision: GateDecision,
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProposalResponse {
    pub proposal: ProposalView,
    pub revision: u32,
    pub revision_record: RevisionRecord,
    pub decision: GateDecision,
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub approval_record: ApprovalRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newly_decided: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    pub user_message: &'static str,
    pub correlation_id: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(lifecycle: Arc<ProposalLifecycle>) -> Router {
    Router::new()
        .route("/api/v1/numbers", post(generate_number))
        .route("/api/v1/proposals", post(create_proposal))
        .route("/api/v1/proposals/{id}", get(get_proposal).put(update_proposal))
        .route("/api/v1/proposals/{id}/revisions", get(list_revisions))
        .route("/api/v1/approvals", post(request_approval).get(list_approvals))
        .route("/api/v1/approvals/{id}/decision", post(decide_approval))
        .with_state(ApiState { lifecycle })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn generate_number(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<GenerateNumberRequest>, JsonRejection>,
) -> ApiResult<Json<NumberResult>> {
    let correlation_id = correlation_id(&headers);
    let Json(request) = payload.map_err(|rejection| bad_payload(rejection, &correlation_id))?;

    state
        .lifecycle
        .generate_number(
            &request.client_id,
            request.responsible_user_id.as_ref(),
            request.revision_index,
        )
        .await
        .map(Json)
        .map_err(|error| api_error(error, &correlation_id))
}

async fn create_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<CreateProposalRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateProposalResponse>)> {
    let correlation_id = correlation_id(&headers);
    let Json(request) = payload.map_err(|rejection| bad_payload(rejection, &correlation_id))?;
    let context = request_context(request.actor, "actor", &correlation_id)?;

    let outcome = state
        .lifecycle
        .create(request.proposal, &context)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;

    let warning = outcome.warning().map(str::to_string);
    let revision = outcome.proposal.revision;
    let proposal =
        ProposalView::new(outcome.proposal).map_err(|error| api_error(error, &correlation_id))?;
    Ok((
        StatusCode::CREATED,
        Json(CreateProposalResponse {
            revision,
            proposal,
            decision: outcome.decision,
            warning,
        }),
    ))
}

async fn get_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ProposalView>> {
    let correlation_id = correlation_id(&headers);
    state
        .lifecycle
        .get(&ProposalId(id))
        .await
        .and_then(ProposalView::new)
        .map(Json)
        .map_err(|error| api_error(error, &correlation_id))
}

async fn update_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProposalRequest>, JsonRejection>,
) -> ApiResult<Json<UpdateProposalResponse>> {
    let correlation_id = correlation_id(&headers);
    let Json(request) = payload.map_err(|rejection| bad_payload(rejection, &correlation_id))?;
    let context = request_context(request.actor, "actor", &correlation_id)?;

    let outcome = state
        .lifecycle
        .update(
            &ProposalId(id),
            request.changes,
            request.requested_status,
            request.expected_revision,
            &context,
        )
        .await
        .map_err(|error| api_error(error, &correlation_id))?;

    let warning = outcome.warning().map(str::to_string);
    let revision = outcome.proposal.revision;
    let proposal =
        ProposalView::new(outcome.proposal).map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(UpdateProposalResponse {
        revision,
        proposal,
        revision_record: outcome.revision,
        decision: outcome.decision,
        warning,
    }))
}

async fn list_revisions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<RevisionRecord>>> {
    let correlation_id = correlation_id(&headers);
    state
        .lifecycle
        .list_revisions(&ProposalId(id))
        .await
        .map(Json)
        .map_err(|error| api_error(error, &correlation_id))
}

async fn request_approval(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<RequestApprovalRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApprovalResponse>)> {
    let correlation_id = correlation_id(&headers);
    let Json(request) = payload.map_err(|rejection| bad_payload(rejection, &correlation_id))?;
    let context = request_context(request.requested_by, "requestedBy", &correlation_id)?;

    let record = state
        .lifecycle
        .approvals()
        .request(&request.proposal_id, request.discount_percent, &context)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;

    Ok((StatusCode::CREATED, Json(ApprovalResponse { approval_record: record, newly_decided: None })))
}

async fn decide_approval(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<DecideApprovalRequest>, JsonRejection>,
) -> ApiResult<Json<ApprovalResponse>> {
    let correlation_id = correlation_id(&headers);
    let Json(request) = payload.map_err(|rejection| bad_payload(rejection, &correlation_id))?;
    let context = request_context(request.decided_by, "decidedBy", &correlation_id)?;

    let outcome = state
        .lifecycle
        .approvals()
        .decide(&ApprovalId(id), request.decision, request.comment, &context)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;

    Ok(Json(ApprovalResponse {
        approval_record: outcome.record,
        newly_decided: Some(outcome.newly_decided),
    }))
}

async fn list_approvals(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListApprovalsQuery>,
) -> ApiResult<Json<Vec<ApprovalRecord>>> {
    let correlation_id = correlation_id(&headers);

    let status = match query.status.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => Some(ApprovalStatus::parse(raw).ok_or_else(|| {
            api_error(
                ApplicationError::Validation(format!("unknown approval status `{raw}`")),
                &correlation_id,
            )
        })?),
        None => None,
    };
    let filter = ApprovalFilter {
        proposal_id: query
            .proposal_id
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(ProposalId),
        status,
    };

    state
        .lifecycle
        .approvals()
        .list(&filter)
        .await
        .map(Json)
        .map_err(|error| api_error(error, &correlation_id))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}

fn request_context(
    actor: UserId,
    field: &str,
    correlation_id: &str,
) -> Result<RequestContext, (StatusCode, Json<ApiError>)> {
    if actor.0.trim().is_empty() {
        return Err(api_error(
            ApplicationError::Validation(format!("{field} is required")),
            correlation_id,
        ));
    }
    Ok(RequestContext::new(actor, correlation_id))
}

fn bad_payload(rejection: JsonRejection, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    api_error(ApplicationError::Validation(rejection.body_text()), correlation_id)
}

fn api_error(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id);
    let (status, code) = match &interface {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
        InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
        InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = %interface.correlation_id(),
            status = status.as_u16(),
            error = %interface,
            "request failed"
        );
    } else {
        warn!(
            event_name = "api.request.rejected",
            correlation_id = %interface.correlation_id(),
            status = status.as_u16(),
            error = %interface,
            "request rejected"
        );
    }

    (
        status,
        Json(ApiError {
            error: code,
            message: interface.message().to_string(),
            user_message: interface.user_message(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}
