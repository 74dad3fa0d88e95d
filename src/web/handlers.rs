//! HTTP handlers for API endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::{Actor, Capabilities, RequestContext};
use crate::error::LogError;
use crate::logs::data::{
    ErrorQuery, IngestReport, LogLevel, LogStats, LuaError, Page, ServerId, ServerSettings,
    StatsWindow,
};
use crate::logs::{CollectorStats, SettingsUpdate};
use crate::notify::StoredNotification;
use crate::web::extract::{ApiError, ApiResult};
use crate::web::state::AppState;

/// Query string of the stats endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub window: Option<String>,
}

/// Query string of the error listing, parsed leniently into an [`ErrorQuery`].
#[derive(Debug, Default, Deserialize)]
pub struct ErrorListParams {
    pub level: Option<String>,
    pub resolved: Option<bool>,
    pub addon: Option<String>,
    pub search: Option<String>,
    pub window: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl ErrorListParams {
    pub fn into_query(self) -> crate::Result<ErrorQuery> {
        let level = match self.level.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(level) => Some(level.parse::<LogLevel>()?),
        };
        let window = self.window.as_deref().unwrap_or_default().parse::<StatsWindow>()?;
        Ok(ErrorQuery {
            level,
            resolved: self.resolved,
            addon: self.addon.filter(|a| !a.is_empty()),
            search: self.search.filter(|s| !s.trim().is_empty()),
            window,
            page: self.page,
            per_page: self.per_page,
        })
    }
}

/// Stats plus the refresh interval the widget should poll at.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub server_id: ServerId,
    pub window: StatsWindow,
    #[serde(flatten)]
    pub stats: LogStats,
    pub refresh_secs: u64,
}

/// Body of the ingest endpoint.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub lines: Vec<String>,
}

fn context(actor: Actor, server_id: u32) -> RequestContext {
    RequestContext::new(actor, ServerId(server_id))
}

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "luawatch",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// Counts for the dashboard widget.
pub async fn get_stats(
    State(state): State<AppState>,
    actor: Actor,
    Path(server_id): Path<u32>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Json<StatsResponse>> {
    let window = params
        .window
        .as_deref()
        .unwrap_or_default()
        .parse::<StatsWindow>()?;
    let stats = state
        .service
        .get_log_stats(&context(actor, server_id), window)?;
    Ok(Json(StatsResponse {
        server_id: ServerId(server_id),
        window,
        stats,
        refresh_secs: state.config.stats_poll_interval_secs,
    }))
}

/// Filtered, paginated error listing.
pub async fn list_errors(
    State(state): State<AppState>,
    actor: Actor,
    Path(server_id): Path<u32>,
    Query(params): Query<ErrorListParams>,
) -> ApiResult<Json<Page<LuaError>>> {
    let query = params.into_query()?;
    let page = state
        .service
        .list_errors(&context(actor, server_id), &query)?;
    Ok(Json(page))
}

pub async fn get_error(
    State(state): State<AppState>,
    actor: Actor,
    Path((server_id, fingerprint)): Path<(u32, String)>,
) -> ApiResult<Json<LuaError>> {
    let error = state
        .service
        .get_error(&context(actor, server_id), &fingerprint)?;
    Ok(Json(error))
}

pub async fn resolve_error(
    State(state): State<AppState>,
    actor: Actor,
    Path((server_id, fingerprint)): Path<(u32, String)>,
) -> ApiResult<Json<LuaError>> {
    let error = state
        .service
        .resolve(&context(actor, server_id), &fingerprint)?;
    Ok(Json(error))
}

pub async fn unresolve_error(
    State(state): State<AppState>,
    actor: Actor,
    Path((server_id, fingerprint)): Path<(u32, String)>,
) -> ApiResult<Json<LuaError>> {
    let error = state
        .service
        .unresolve(&context(actor, server_id), &fingerprint)?;
    Ok(Json(error))
}

/// Delete every stored error of the server.
pub async fn clear_errors(
    State(state): State<AppState>,
    actor: Actor,
    Path(server_id): Path<u32>,
) -> ApiResult<Json<Value>> {
    let removed = state.service.clear_logs(&context(actor, server_id))?;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn get_settings(
    State(state): State<AppState>,
    actor: Actor,
    Path(server_id): Path<u32>,
) -> ApiResult<Json<ServerSettings>> {
    Ok(Json(state.service.settings(&context(actor, server_id))?))
}

pub async fn update_settings(
    State(state): State<AppState>,
    actor: Actor,
    Path(server_id): Path<u32>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<ServerSettings>> {
    let settings = state
        .service
        .update_settings(&context(actor, server_id), update)?;
    Ok(Json(settings))
}

pub async fn get_capabilities(
    State(state): State<AppState>,
    actor: Actor,
    Path(server_id): Path<u32>,
) -> ApiResult<Json<Capabilities>> {
    Ok(Json(state.service.capabilities(&context(actor, server_id))?))
}

/// Tailer counters of a server, `null` when it is not being collected here.
pub async fn get_collector_stats(
    State(state): State<AppState>,
    actor: Actor,
    Path(server_id): Path<u32>,
) -> ApiResult<Json<Option<CollectorStats>>> {
    let server = state.service.server(&context(actor, server_id))?;
    let stats = state
        .collector
        .as_ref()
        .and_then(|collector| collector.stats(server.id));
    Ok(Json(stats))
}

/// Push raw console lines for a server. Staff only.
pub async fn ingest_lines(
    State(state): State<AppState>,
    actor: Actor,
    Path(server_id): Path<u32>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestReport>)> {
    if !actor.is_admin {
        return Err(ApiError(LogError::forbidden(
            "only administrators can push log lines",
        )));
    }
    let report = state.service.ingest_lines(
        ServerId(server_id),
        request.lines.iter().map(String::as_str),
        Utc::now(),
    )?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// Stored notifications of the caller, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    actor: Actor,
) -> Json<Vec<StoredNotification>> {
    Json(state.notifications.for_user(&actor.user_id))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StoredNotification>> {
    Ok(Json(state.notifications.mark_read(&actor.user_id, id)?))
}
