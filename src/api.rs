//! HTTP routes

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::{AppError, Result};
use crate::hierarchy::ChildPolicy;
use crate::models::{
    AllocateRequest, Area, CodeApplication, CodeRecord, Courier, CreateAreaRequest,
    CreateCourierRequest, CreateSchoolRequest, School,
};
use crate::registry::CodeView;
use crate::routing::{CancelActor, CourierCandidate, Task, TaskStatus};
use crate::websocket;
use crate::AppState;

/// Build the full application router
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/schools", post(create_school))
        .route("/schools/:school/areas", post(create_area))
        .route("/schools/:school/deactivate", post(deactivate_school))
        .route(
            "/schools/:school/areas/:area/deactivate",
            post(deactivate_area),
        )
        .route("/codes/applications", post(allocate_code))
        .route("/codes/applications/:id/approve", post(approve_application))
        .route("/codes/applications/:id/reject", post(reject_application))
        .route("/codes/:code", get(view_code))
        .route("/couriers", post(create_courier))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/parent", post(reparent_courier))
        .route("/couriers/:id/descendants", get(courier_descendants))
        .route("/couriers/:id/deactivate", post(deactivate_courier))
        .route("/couriers/:id/score", post(set_score))
        .route("/couriers/:id/eligible-tasks", get(eligible_tasks))
        .route("/tasks", post(create_task))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/candidates", get(task_candidates))
        .route("/tasks/:id/accept", post(accept_task))
        .route("/tasks/:id/assign", post(assign_task))
        .route("/tasks/:id/status", post(advance_task))
        .route("/tasks/:id/cancel", post(cancel_task))
        .route("/admin/sweep", post(sweep))
        .route("/admin/config/reload", post(reload_config))
        .route("/ws/tasks", get(websocket::handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map body rejections to a 400 in the common error shape
fn extract_json<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(v)| v)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

async fn health() -> &'static str {
    "ok"
}

// Schools and areas

#[derive(Debug, Serialize)]
pub struct RetiredCodes {
    pub retired_codes: u64,
}

async fn create_school(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<CreateSchoolRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<School>)> {
    let req = extract_json(body)?;
    let school = state.registry.create_school(&req.code, &req.name).await?;
    Ok((StatusCode::CREATED, Json(school)))
}

async fn create_area(
    State(state): State<Arc<AppState>>,
    Path(school): Path<String>,
    body: std::result::Result<Json<CreateAreaRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Area>)> {
    let req = extract_json(body)?;
    let area = state
        .registry
        .create_area(&school, &req.area, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(area)))
}

async fn deactivate_school(
    State(state): State<Arc<AppState>>,
    Path(school): Path<String>,
) -> Result<Json<RetiredCodes>> {
    let retired_codes = state.registry.deactivate_school(&school).await?;
    Ok(Json(RetiredCodes { retired_codes }))
}

async fn deactivate_area(
    State(state): State<Arc<AppState>>,
    Path((school, area)): Path<(String, String)>,
) -> Result<Json<RetiredCodes>> {
    let retired_codes = state.registry.deactivate_area(&school, &area).await?;
    Ok(Json(RetiredCodes { retired_codes }))
}

// Codes

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub courier_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ViewerQuery {
    pub courier_id: Option<Uuid>,
}

async fn allocate_code(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<AllocateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CodeApplication>)> {
    let req = extract_json(body)?;
    let application = state.registry.allocate(req).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn approve_application(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: std::result::Result<Json<ReviewRequest>, JsonRejection>,
) -> Result<Json<CodeRecord>> {
    let req = extract_json(body)?;
    let record = state.registry.approve(id, req.courier_id).await?;
    Ok(Json(record))
}

async fn reject_application(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: std::result::Result<Json<ReviewRequest>, JsonRejection>,
) -> Result<Json<CodeApplication>> {
    let req = extract_json(body)?;
    let application = state.registry.reject(id, req.courier_id).await?;
    Ok(Json(application))
}

async fn view_code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<ViewerQuery>,
) -> Result<Json<CodeView>> {
    let view = state.registry.view(&code, query.courier_id).await?;
    Ok(Json(view))
}

// Couriers

#[derive(Debug, Deserialize)]
pub struct ReparentRequest {
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateCourierRequest {
    #[serde(default = "default_child_policy")]
    pub children: ChildPolicy,
}

fn default_child_policy() -> ChildPolicy {
    ChildPolicy::Reparent
}

#[derive(Debug, Serialize)]
pub struct DeactivatedCouriers {
    pub deactivated: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub performance_score: f64,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<CreateCourierRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Courier>)> {
    let req = extract_json(body)?;
    let courier = state.hierarchy.create_courier(req).await?;
    Ok((StatusCode::CREATED, Json(courier)))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>> {
    Ok(Json(state.hierarchy.get_courier(id).await?))
}

async fn reparent_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: std::result::Result<Json<ReparentRequest>, JsonRejection>,
) -> Result<Json<Courier>> {
    let req = extract_json(body)?;
    Ok(Json(state.hierarchy.reparent(id, req.parent_id).await?))
}

async fn courier_descendants(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Courier>>> {
    Ok(Json(state.hierarchy.descendants_of(id).await?))
}

async fn deactivate_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: std::result::Result<Json<DeactivateCourierRequest>, JsonRejection>,
) -> Result<Json<DeactivatedCouriers>> {
    let req = extract_json(body)?;
    let deactivated = state.hierarchy.deactivate(id, req.children).await?;
    Ok(Json(DeactivatedCouriers { deactivated }))
}

async fn set_score(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: std::result::Result<Json<ScoreRequest>, JsonRejection>,
) -> Result<Json<Courier>> {
    let req = extract_json(body)?;
    Ok(Json(
        state
            .hierarchy
            .set_performance_score(id, req.performance_score)
            .await?,
    ))
}

async fn eligible_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Task>>> {
    Ok(Json(state.router.eligible_tasks_for(id).await?))
}

// Tasks

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub pickup_code: String,
    pub delivery_code: String,
    /// Seconds until an unclaimed task expires; server default when absent
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub courier_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub courier_id: Uuid,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
pub struct SweepResult {
    pub expired: usize,
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>)> {
    let req = extract_json(body)?;
    let ttl = req
        .ttl_secs
        .map(|secs| {
            Duration::try_seconds(secs)
                .ok_or_else(|| AppError::BadRequest(format!("ttl_secs {} is out of range", secs)))
        })
        .transpose()?;
    let task = state
        .router
        .create_task(&req.pickup_code, &req.delivery_code, ttl)
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Task>> {
    Ok(Json(state.router.get_task(id).await?))
}

async fn task_candidates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CourierCandidate>>> {
    Ok(Json(state.router.rank_candidates(id).await?))
}

async fn accept_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: std::result::Result<Json<AcceptRequest>, JsonRejection>,
) -> Result<Json<Task>> {
    let req = extract_json(body)?;
    Ok(Json(state.router.accept(id, req.courier_id).await?))
}

async fn assign_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>> {
    Ok(Json(state.router.assign_best(id).await?))
}

async fn advance_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: std::result::Result<Json<AdvanceRequest>, JsonRejection>,
) -> Result<Json<Task>> {
    let req = extract_json(body)?;
    Ok(Json(
        state
            .router
            .advance_status(id, req.courier_id, req.status)
            .await?,
    ))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: std::result::Result<Json<CancelActor>, JsonRejection>,
) -> Result<Json<Task>> {
    let actor = extract_json(body)?;
    Ok(Json(state.router.cancel(id, actor).await?))
}

// Admin

async fn sweep(State(state): State<Arc<AppState>>) -> Result<Json<SweepResult>> {
    let expired = state.router.sweep_expired(Utc::now()).await?;
    Ok(Json(SweepResult { expired }))
}

/// Swap in a new policy: the request body when present, else the config file
async fn reload_config(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<CoreConfig>> {
    let reloaded = if body.is_empty() {
        state.config.reload_from_source()
    } else {
        let config: CoreConfig =
            serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
        state.config.reload(config)
    }
    .map_err(|e| match e {
        AppError::Config(msg) => AppError::BadRequest(msg),
        other => other,
    })?;

    Ok(Json(reloaded.as_ref().clone()))
}
