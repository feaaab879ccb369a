use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::processor::{AllocationProcessor, ProcessingSummary};
use super::requests::{
    AllocationRequest, AllocationRequestService, Document, NewAllocationRequest, RequestId,
};
use super::rules::{
    AllocationRule, ApplicantProfile, RuleCatalog, RuleDefinition, RuleId, StudentId,
};
use super::statistics::AllocationStatistics;
use crate::error::AppError;
use crate::inventory::BedId;

const DEFAULT_ACTOR: &str = "staff";

/// Services behind the allocation endpoints.
#[derive(Clone)]
pub struct AllocationApi {
    pub rules: Arc<RuleCatalog>,
    pub requests: Arc<AllocationRequestService>,
    pub processor: Arc<AllocationProcessor>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DecisionBody {
    fn actor(&self) -> &str {
        self.actor.as_deref().unwrap_or(DEFAULT_ACTOR)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AllocateBody {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default, alias = "bedId")]
    pub bed_id: Option<BedId>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentBody {
    #[serde(rename = "type", alias = "doc_type")]
    pub doc_type: String,
    pub url: String,
    #[serde(default)]
    pub actor: Option<String>,
}

pub fn allocation_router(api: AllocationApi) -> Router {
    Router::new()
        .route("/api/v1/rules", post(create_rule_handler))
        .route("/api/v1/rules/active", get(active_rules_handler))
        .route("/api/v1/rules/student", get(student_rules_handler))
        .route(
            "/api/v1/rules/:rule_id",
            get(get_rule_handler).put(update_rule_handler),
        )
        .route("/api/v1/rules/:rule_id/deactivate", post(deactivate_rule_handler))
        .route("/api/v1/rules/:rule_id/promote", post(promote_handler))
        .route(
            "/api/v1/rules/:rule_id/compact-waitlist",
            post(compact_waitlist_handler),
        )
        .route("/api/v1/rules/:rule_id/requests", get(rule_requests_handler))
        .route("/api/v1/requests", post(create_request_handler))
        .route("/api/v1/requests/:request_id", get(get_request_handler))
        .route("/api/v1/requests/:request_id/approve", post(approve_handler))
        .route("/api/v1/requests/:request_id/reject", post(reject_handler))
        .route("/api/v1/requests/:request_id/waitlist", post(waitlist_handler))
        .route("/api/v1/requests/:request_id/allocate", post(allocate_handler))
        .route("/api/v1/requests/:request_id/cancel", post(cancel_handler))
        .route(
            "/api/v1/requests/:request_id/documents",
            post(add_document_handler),
        )
        .route(
            "/api/v1/requests/:request_id/documents/:index/verify",
            post(verify_document_handler),
        )
        .route(
            "/api/v1/students/:student_id/requests",
            get(student_requests_handler),
        )
        .route("/api/v1/process/:rule_id", post(process_handler))
        .route("/api/v1/reconcile-bed-bindings", post(reconcile_handler))
        .route("/api/v1/statistics", get(statistics_handler))
        .with_state(api)
}

pub(crate) async fn create_rule_handler(
    State(api): State<AllocationApi>,
    Json(definition): Json<RuleDefinition>,
) -> Result<(StatusCode, Json<AllocationRule>), AppError> {
    Ok((StatusCode::CREATED, Json(api.rules.create_rule(definition)?)))
}

pub(crate) async fn active_rules_handler(
    State(api): State<AllocationApi>,
) -> Result<Json<Vec<AllocationRule>>, AppError> {
    let now = api.rules.now();
    Ok(Json(api.rules.active_rules_for(now)?))
}

pub(crate) async fn student_rules_handler(
    State(api): State<AllocationApi>,
    Query(profile): Query<ApplicantProfile>,
) -> Result<Json<Vec<AllocationRule>>, AppError> {
    let now = api.rules.now();
    Ok(Json(api.rules.eligible_rules_for(&profile, now)?))
}

pub(crate) async fn get_rule_handler(
    State(api): State<AllocationApi>,
    Path(rule_id): Path<String>,
) -> Result<Json<AllocationRule>, AppError> {
    Ok(Json(api.rules.get_rule(&RuleId(rule_id))?))
}

pub(crate) async fn update_rule_handler(
    State(api): State<AllocationApi>,
    Path(rule_id): Path<String>,
    Json(definition): Json<RuleDefinition>,
) -> Result<Json<AllocationRule>, AppError> {
    Ok(Json(api.rules.update_rule(&RuleId(rule_id), definition)?))
}

pub(crate) async fn deactivate_rule_handler(
    State(api): State<AllocationApi>,
    Path(rule_id): Path<String>,
) -> Result<Json<AllocationRule>, AppError> {
    Ok(Json(api.rules.deactivate_rule(&RuleId(rule_id))?))
}

pub(crate) async fn promote_handler(
    State(api): State<AllocationApi>,
    Path(rule_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, AppError> {
    let promoted = api
        .requests
        .promote_from_waitlist(&RuleId(rule_id), body.actor())?;
    Ok(Json(json!({ "promoted": promoted })))
}

pub(crate) async fn compact_waitlist_handler(
    State(api): State<AllocationApi>,
    Path(rule_id): Path<String>,
) -> Result<Json<Vec<AllocationRequest>>, AppError> {
    Ok(Json(api.requests.compact_waitlist(&RuleId(rule_id))?))
}

pub(crate) async fn rule_requests_handler(
    State(api): State<AllocationApi>,
    Path(rule_id): Path<String>,
) -> Result<Json<Vec<AllocationRequest>>, AppError> {
    let rule_id = RuleId(rule_id);
    api.rules.get_rule(&rule_id)?;
    Ok(Json(api.requests.for_rule(&rule_id)?))
}

pub(crate) async fn create_request_handler(
    State(api): State<AllocationApi>,
    Json(input): Json<NewAllocationRequest>,
) -> Result<(StatusCode, Json<AllocationRequest>), AppError> {
    Ok((StatusCode::CREATED, Json(api.requests.create(input)?)))
}

pub(crate) async fn get_request_handler(
    State(api): State<AllocationApi>,
    Path(request_id): Path<String>,
) -> Result<Json<AllocationRequest>, AppError> {
    Ok(Json(api.requests.get(&RequestId(request_id))?))
}

pub(crate) async fn approve_handler(
    State(api): State<AllocationApi>,
    Path(request_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<AllocationRequest>, AppError> {
    Ok(Json(api.requests.approve(
        &RequestId(request_id),
        body.actor(),
        body.comment.clone(),
    )?))
}

pub(crate) async fn reject_handler(
    State(api): State<AllocationApi>,
    Path(request_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<AllocationRequest>, AppError> {
    let reason = body.reason.as_deref().unwrap_or_default();
    Ok(Json(api.requests.reject(
        &RequestId(request_id),
        body.actor(),
        reason,
    )?))
}

pub(crate) async fn waitlist_handler(
    State(api): State<AllocationApi>,
    Path(request_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<AllocationRequest>, AppError> {
    Ok(Json(
        api.requests.waitlist(&RequestId(request_id), body.actor())?,
    ))
}

pub(crate) async fn allocate_handler(
    State(api): State<AllocationApi>,
    Path(request_id): Path<String>,
    Json(body): Json<AllocateBody>,
) -> Result<Json<AllocationRequest>, AppError> {
    let actor = body.actor.as_deref().unwrap_or(DEFAULT_ACTOR);
    Ok(Json(api.requests.allocate(
        &RequestId(request_id),
        actor,
        body.bed_id.as_ref(),
    )?))
}

pub(crate) async fn cancel_handler(
    State(api): State<AllocationApi>,
    Path(request_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<AllocationRequest>, AppError> {
    let reason = body.reason.as_deref().unwrap_or_default();
    Ok(Json(api.requests.cancel(
        &RequestId(request_id),
        body.actor(),
        reason,
    )?))
}

pub(crate) async fn add_document_handler(
    State(api): State<AllocationApi>,
    Path(request_id): Path<String>,
    Json(body): Json<DocumentBody>,
) -> Result<Json<AllocationRequest>, AppError> {
    let actor = body.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_string());
    let document = Document {
        doc_type: body.doc_type,
        url: body.url,
        verified: false,
    };
    Ok(Json(api.requests.add_document(
        &RequestId(request_id),
        &actor,
        document,
    )?))
}

pub(crate) async fn verify_document_handler(
    State(api): State<AllocationApi>,
    Path((request_id, index)): Path<(String, usize)>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<AllocationRequest>, AppError> {
    Ok(Json(api.requests.verify_document(
        &RequestId(request_id),
        body.actor(),
        index,
    )?))
}

pub(crate) async fn student_requests_handler(
    State(api): State<AllocationApi>,
    Path(student_id): Path<String>,
) -> Result<Json<Vec<AllocationRequest>>, AppError> {
    Ok(Json(api.requests.for_student(&StudentId(student_id))?))
}

pub(crate) async fn process_handler(
    State(api): State<AllocationApi>,
    Path(rule_id): Path<String>,
) -> Result<Json<ProcessingSummary>, AppError> {
    let processor = api.processor.clone();
    let rule_id = RuleId(rule_id);
    let summary = tokio::task::spawn_blocking(move || processor.process_rule(&rule_id))
        .await
        .map_err(|err| AppError::Io(std::io::Error::other(err)))??;
    Ok(Json(summary))
}

pub(crate) async fn reconcile_handler(
    State(api): State<AllocationApi>,
) -> Result<Json<Value>, AppError> {
    let released = api.requests.reconcile_bed_bindings()?;
    Ok(Json(json!({ "released": released })))
}

pub(crate) async fn statistics_handler(
    State(api): State<AllocationApi>,
) -> Result<Json<AllocationStatistics>, AppError> {
    Ok(Json(api.requests.statistics()?))
}
