// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP/SSE surface: the public API, the per-workflow event stream, and
//! the registry protocol's `GET /<fqdn>`.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path as AxumPath, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use pml_core::{ApprovalDecision, ExecutionPlan, Fqdn, PermissionMatrix};
use pml_dag::cancel::CancellationReason;
use pml_executor::{ExecuteOptions, ExecutionOutcome, WorkflowEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Build the daemon's router over `state`.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/workflows/execute", post(execute))
        .route("/workflows/{run_id}/continue", post(continue_workflow))
        .route("/workflows/{run_id}/decide", post(decide))
        .route("/workflows/{run_id}/pause", post(pause))
        .route("/workflows/{run_id}/resume", post(resume))
        .route("/workflows/{run_id}/cancel", post(cancel))
        .route("/workflows/{run_id}/replan", post(replan))
        .route("/workflows/{run_id}/tasks/{task_id}", get(get_task_result))
        .route("/workflows/{run_id}/events", get(workflow_events))
        .route("/capabilities/discover", get(discover))
        .route("/capabilities/search", get(search_capabilities))
        .route("/capabilities/{name}/rename", post(rename))
        .route("/capabilities/lookup", get(lookup))
        .route("/capabilities", get(list_capabilities))
        .route("/capabilities/{name}/history", get(history))
        .route("/capabilities/whois/{fqdn}", get(whois))
        .route("/{fqdn}", get(registry_lookup))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct ExecuteRequest {
    capability_fqdn: Option<String>,
    #[serde(default)]
    context: Value,
    #[serde(default)]
    permission_tier: Option<pml_core::PermissionTier>,
}

async fn execute(State(state): State<Arc<AppState>>, Json(body): Json<ExecuteRequest>) -> Result<Json<ExecutionOutcome>, ApiError> {
    let fqdn_str = body.capability_fqdn.ok_or_else(|| ApiError::bad_request("capability_fqdn is required"))?;
    let fqdn = Fqdn::from_str(&fqdn_str).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let capability = state.store.get(&fqdn).ok_or_else(|| ApiError::not_found(format!("no capability `{fqdn_str}`")))?;
    let permissions = body.permission_tier.map_or_else(|| state.default_permissions.clone(), PermissionMatrix::for_tier);
    let options = ExecuteOptions { capability_fqdn: Some(fqdn_str), initial_context: body.context, permissions };
    let outcome = state.executor.execute(capability.static_structure, options).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct ContinueRequest {
    decision: ApprovalDecision,
}

async fn continue_workflow(State(state): State<Arc<AppState>>, AxumPath(run_id): AxumPath<Uuid>, Json(body): Json<ContinueRequest>) -> Result<Json<ExecutionOutcome>, ApiError> {
    Ok(Json(state.executor.continue_workflow(run_id, body.decision).await?))
}

#[derive(Deserialize)]
struct DecideRequest {
    outcome: String,
}

async fn decide(State(state): State<Arc<AppState>>, AxumPath(run_id): AxumPath<Uuid>, Json(body): Json<DecideRequest>) -> Result<Json<ExecutionOutcome>, ApiError> {
    Ok(Json(state.executor.decide(run_id, body.outcome).await?))
}

async fn pause(State(state): State<Arc<AppState>>, AxumPath(run_id): AxumPath<Uuid>) -> Result<Json<Value>, ApiError> {
    state.executor.pause(run_id).await?;
    Ok(Json(serde_json::json!({})))
}

async fn resume(State(state): State<Arc<AppState>>, AxumPath(run_id): AxumPath<Uuid>) -> Result<Json<ExecutionOutcome>, ApiError> {
    Ok(Json(state.executor.resume(run_id).await?))
}

#[derive(Deserialize)]
struct CancelRequest {
    #[serde(default = "default_cancel_reason")]
    reason: CancellationReason,
}

fn default_cancel_reason() -> CancellationReason {
    CancellationReason::UserRequested
}

async fn cancel(State(state): State<Arc<AppState>>, AxumPath(run_id): AxumPath<Uuid>, Json(body): Json<CancelRequest>) -> Result<Json<Value>, ApiError> {
    state.executor.cancel(run_id, body.reason).await?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Deserialize)]
struct ReplanRequestBody {
    reason: String,
    new_dag: ExecutionPlan,
}

async fn replan(State(state): State<Arc<AppState>>, AxumPath(run_id): AxumPath<Uuid>, Json(body): Json<ReplanRequestBody>) -> Result<Json<Value>, ApiError> {
    state.executor.replan(run_id, body.reason, body.new_dag).await?;
    Ok(Json(serde_json::json!({})))
}

async fn get_task_result(State(state): State<Arc<AppState>>, AxumPath((run_id, task_id)): AxumPath<(Uuid, String)>) -> Result<Json<Option<Value>>, ApiError> {
    Ok(Json(state.executor.get_task_result(run_id, &task_id).await?))
}

// ---------------------------------------------------------------------
// Events (SSE)
// ---------------------------------------------------------------------

async fn workflow_events(State(state): State<Arc<AppState>>, AxumPath(run_id): AxumPath<Uuid>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.executor.subscribe().for_run(run_id);
    let stream = async_stream::stream! {
        let mut subscription = subscription;
        while let Some(event) = subscription.recv().await {
            if let Ok(data) = serde_json::to_string(&event) {
                yield Ok(Event::default().event(event_name(&event)).data(data));
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn event_name(event: &WorkflowEvent) -> &'static str {
    match event {
        WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
        WorkflowEvent::TaskStarted { .. } => "task_started",
        WorkflowEvent::TaskCompleted { .. } => "task_completed",
        WorkflowEvent::ApprovalRequired { .. } => "approval_required",
        WorkflowEvent::AwaitingInput { .. } => "awaiting_input",
        WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
        WorkflowEvent::Error { .. } => "error",
    }
}

// ---------------------------------------------------------------------
// Capability discovery / resolver surface
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct IntentQuery {
    intent: String,
}

#[derive(Serialize)]
struct DiscoverHit {
    fqdn: String,
    display_name: String,
    score: f64,
}

async fn discover(State(state): State<Arc<AppState>>, Query(query): Query<IntentQuery>) -> Json<Vec<DiscoverHit>> {
    let needle = query.intent.to_lowercase();
    let mut hits: Vec<DiscoverHit> = state
        .store
        .all()
        .into_iter()
        .filter_map(|c| {
            let haystack = c.display_name.to_lowercase();
            haystack.contains(&needle).then(|| DiscoverHit { fqdn: c.fqdn.to_string(), display_name: c.display_name.clone(), score: intent_score(&needle, &haystack) })
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Json(hits)
}

fn intent_score(needle: &str, haystack: &str) -> f64 {
    if haystack == needle {
        1.0
    } else if haystack.starts_with(needle) {
        0.8
    } else {
        0.5
    }
}

async fn search_capabilities(State(state): State<Arc<AppState>>, Query(query): Query<IntentQuery>) -> Json<Vec<pml_core::Capability>> {
    let needle = query.intent.to_lowercase();
    let hits = state.store.all().into_iter().filter(|c| c.display_name.to_lowercase().contains(&needle)).collect();
    Json(hits)
}

#[derive(Deserialize)]
struct RenameRequest {
    new_name: String,
    expected_version: u32,
    renamed_by: String,
}

async fn rename(State(state): State<Arc<AppState>>, AxumPath(name): AxumPath<String>, Json(body): Json<RenameRequest>) -> Result<Json<pml_core::Capability>, ApiError> {
    let capability = state.store.resolve(&name).ok_or_else(|| ApiError::not_found(format!("no capability `{name}`")))?;
    if capability.version != body.expected_version {
        return Err(ApiError::bad_request("version mismatch"));
    }
    let renamed = state.store.rename(&capability.fqdn, body.new_name, body.renamed_by)?;
    Ok(Json(renamed))
}

#[derive(Deserialize)]
struct NameQuery {
    name: String,
}

async fn lookup(State(state): State<Arc<AppState>>, Query(query): Query<NameQuery>) -> Result<Json<pml_core::Capability>, ApiError> {
    state.store.resolve(&query.name).map(Json).ok_or_else(|| ApiError::not_found(format!("no capability `{}`", query.name)))
}

#[derive(Deserialize)]
struct ListQuery {
    pattern: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_capabilities(State(state): State<Arc<AppState>>, Query(query): Query<ListQuery>) -> Json<Vec<pml_core::Capability>> {
    let mut capabilities = state.store.all();
    if let Some(pattern) = &query.pattern {
        capabilities.retain(|c| c.display_name.contains(pattern.as_str()));
    }
    capabilities.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(capabilities.len());
    Json(capabilities.into_iter().skip(offset).take(limit).collect())
}

async fn history(State(state): State<Arc<AppState>>, AxumPath(name): AxumPath<String>) -> Result<Json<Vec<pml_core::Alias>>, ApiError> {
    let capability = state.store.resolve(&name).ok_or_else(|| ApiError::not_found(format!("no capability `{name}`")))?;
    Ok(Json(state.store.aliases_for(&capability.fqdn)))
}

async fn whois(State(state): State<Arc<AppState>>, AxumPath(fqdn): AxumPath<String>) -> Result<Json<pml_core::Capability>, ApiError> {
    let fqdn = Fqdn::from_str(&fqdn).map_err(|e| ApiError::bad_request(e.to_string()))?;
    state.store.get(&fqdn).map(Json).ok_or_else(|| ApiError::not_found(format!("no capability `{fqdn}`")))
}

// ---------------------------------------------------------------------
// Registry protocol
// ---------------------------------------------------------------------

async fn registry_lookup(State(state): State<Arc<AppState>>, AxumPath(fqdn): AxumPath<String>) -> Result<impl IntoResponse, ApiError> {
    let fqdn = Fqdn::from_str(&fqdn).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let capability = state.store.get(&fqdn).ok_or_else(|| ApiError::not_found(format!("no capability `{fqdn}`")))?;
    match capability.record_type {
        pml_core::RecordType::Capability => Ok(([("content-type", "application/typescript")], capability.code).into_response()),
        pml_core::RecordType::McpServer => Ok(Json(serde_json::json!({
            "fqdn": capability.fqdn.to_string(),
            "type": "stdio",
            "tools": capability.tools_used,
            "routing": capability.routing,
        }))
        .into_response()),
    }
}
