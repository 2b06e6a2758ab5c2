use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::directory::TeamService;
use super::engine::ReviewerEngine;
use super::models::{SortOrder, TeamMember};
use super::selection::RandomSource;
use super::sqlite::SqliteStore;
use super::stats::StatsService;
use super::store::OpContext;
use crate::errors::{Entity, ServiceError};

pub const MIN_PR_TITLE_LEN: usize = 5;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub engine: ReviewerEngine<SqliteStore>,
    pub teams: TeamService<SqliteStore>,
    pub stats: StatsService<SqliteStore>,
    pub request_timeout: Duration,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(store: SqliteStore, random: Arc<dyn RandomSource>, request_timeout: Duration) -> Self {
        Self {
            engine: ReviewerEngine::new(store.clone(), random),
            teams: TeamService::new(store.clone()),
            stats: StatsService::new(store),
            request_timeout,
        }
    }

    /// Context for one request, bounded by the configured timeout.
    fn op_context(&self) -> OpContext {
        OpContext::new().with_timeout(self.request_timeout)
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AddTeamRequest {
    pub team_name: String,
    /// Required; an empty list is allowed.
    #[serde(default)]
    pub members: Option<Vec<TeamMember>>,
}

#[derive(Deserialize)]
pub struct TeamQuery {
    pub team_name: String,
}

#[derive(Deserialize)]
pub struct SetIsActiveRequest {
    pub user_id: String,
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct CreatePullRequestRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
}

#[derive(Deserialize)]
pub struct MergePullRequestRequest {
    pub pull_request_id: String,
}

#[derive(Deserialize)]
pub struct ReassignRequest {
    pub pull_request_id: String,
    pub old_reviewer_id: String,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub sort: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    /// The request could not be decoded at all.
    BadRequest(String),
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        let err = match self {
            ApiError::BadRequest(_) => return (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Service(err) => err,
        };
        match err {
            ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ServiceError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ServiceError::AlreadyExists {
                entity: Entity::Team,
                ..
            } => (StatusCode::BAD_REQUEST, "TEAM_EXISTS"),
            ServiceError::AlreadyExists {
                entity: Entity::PullRequest,
                ..
            } => (StatusCode::CONFLICT, "PR_EXISTS"),
            ServiceError::AlreadyExists { .. } | ServiceError::Conflict(_) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            ServiceError::PrMerged { .. } => (StatusCode::CONFLICT, "PR_MERGED"),
            ServiceError::NotAssigned { .. } => (StatusCode::CONFLICT, "NOT_ASSIGNED"),
            ServiceError::NoCandidate { .. } => (StatusCode::CONFLICT, "NO_CANDIDATE"),
            ServiceError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            ServiceError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
            ServiceError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Service(ServiceError::Internal(err)) => {
                error!(error = ?err, "Internal error while handling request");
                "internal server error".to_string()
            }
            ApiError::Service(err) => err.to_string(),
        };
        (
            status,
            Json(json!({"error": {"code": code, "message": message}})),
        )
            .into_response()
    }
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{} is required", field)).into());
    }
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/team/add", post(add_team))
        .route("/team/get", get(get_team))
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_user_reviews))
        .route("/pullRequest/create", post(create_pull_request))
        .route("/pullRequest/merge", post(merge_pull_request))
        .route("/pullRequest/reassign", post(reassign_reviewer))
        .route("/statistics", get(statistics))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn add_team(
    State(state): State<SharedState>,
    payload: Result<Json<AddTeamRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let members = req
        .members
        .ok_or_else(|| ServiceError::Validation("members is required".into()))?;
    let ctx = state.op_context();
    let _guard = ctx.drop_guard();

    let team = state.teams.add_team(&ctx, &req.team_name, members).await?;
    Ok((StatusCode::CREATED, Json(json!({ "team": team }))))
}

async fn get_team(
    State(state): State<SharedState>,
    query: Result<Query<TeamQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    require("team_name", &query.team_name)?;
    let ctx = state.op_context();
    let _guard = ctx.drop_guard();

    let team = state.teams.get_team(&ctx, &query.team_name).await?;
    Ok(Json(team))
}

async fn set_is_active(
    State(state): State<SharedState>,
    payload: Result<Json<SetIsActiveRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require("user_id", &req.user_id)?;
    let ctx = state.op_context();
    let _guard = ctx.drop_guard();

    let user = state
        .teams
        .set_user_active(&ctx, &req.user_id, req.is_active)
        .await?;
    Ok(Json(json!({ "user": user })))
}

async fn get_user_reviews(
    State(state): State<SharedState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    require("user_id", &query.user_id)?;
    let ctx = state.op_context();
    let _guard = ctx.drop_guard();

    let reviews = state.teams.reviews_for_user(&ctx, &query.user_id).await?;
    Ok(Json(reviews))
}

async fn create_pull_request(
    State(state): State<SharedState>,
    payload: Result<Json<CreatePullRequestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require("pull_request_id", &req.pull_request_id)?;
    require("author_id", &req.author_id)?;
    if req.pull_request_name.chars().count() < MIN_PR_TITLE_LEN {
        return Err(ServiceError::Validation(format!(
            "pull_request_name must be at least {} characters",
            MIN_PR_TITLE_LEN
        ))
        .into());
    }
    let ctx = state.op_context();
    let _guard = ctx.drop_guard();

    let pr = state
        .engine
        .create_pull_request(
            &ctx,
            &req.pull_request_id,
            &req.pull_request_name,
            &req.author_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "pr": pr }))))
}

async fn merge_pull_request(
    State(state): State<SharedState>,
    payload: Result<Json<MergePullRequestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require("pull_request_id", &req.pull_request_id)?;
    let ctx = state.op_context();
    let _guard = ctx.drop_guard();

    let pr = state.engine.merge_pull_request(&ctx, &req.pull_request_id).await?;
    Ok(Json(json!({ "pr": pr })))
}

async fn reassign_reviewer(
    State(state): State<SharedState>,
    payload: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require("pull_request_id", &req.pull_request_id)?;
    require("old_reviewer_id", &req.old_reviewer_id)?;
    let ctx = state.op_context();
    let _guard = ctx.drop_guard();

    let outcome = state
        .engine
        .reassign_reviewer(&ctx, &req.pull_request_id, &req.old_reviewer_id)
        .await?;
    Ok(Json(json!({
        "pr": outcome.pr,
        "replaced_by": outcome.replaced_by,
    })))
}

async fn statistics(
    State(state): State<SharedState>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let order = match query.sort.as_deref() {
        None | Some("") => SortOrder::default(),
        Some(raw) => SortOrder::from_str(raw).map_err(ServiceError::Validation)?,
    };
    let ctx = state.op_context();
    let _guard = ctx.drop_guard();

    let report = state.stats.statistics(&ctx, order).await?;
    Ok(Json(report))
}
