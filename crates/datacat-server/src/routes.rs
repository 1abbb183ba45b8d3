//! HTTP handlers and error mapping.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use datacat_auth::{require_role, validate_user_session, AuthError};
use datacat_core::search::DEFAULT_LIMIT;
use datacat_core::{entities, ingest, navigation, schema_info, search, SearchRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/search", get(run_search))
        .route("/api/schema", get(schema_payload))
        .route("/api/schema/refresh", post(refresh_schema))
        .route("/api/sort-fields", get(sort_fields))
        .route("/api/dropdown/{entity_key}", get(dropdown))
        .route("/api/entities/search", get(entity_search))
        .route("/api/entities/{id}", get(get_entity).put(update_entity))
        .route("/api/entities", delete(delete_entities))
        .route("/api/import", post(import))
        .route("/api/session", get(session_status))
        .with_state(state)
}

/// Unified error type: core errors and auth errors both map to the
/// `{"error", "message"}` body with their own status codes.
pub enum ApiError {
    Core(datacat_core::Error),
    Auth(AuthError),
}

impl From<datacat_core::Error> for ApiError {
    fn from(e: datacat_core::Error) -> Self {
        Self::Core(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Core(e) => (e.status_code(), e.to_json()),
            Self::Auth(e) => (e.status_code(), e.to_json()),
        };
        (status, Json(body)).into_response()
    }
}

/// Check the session and the configured role before any mutation.
fn authorize_mutation(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let status = validate_user_session(headers, &state.auth);
    require_role(&status, state.auth.required_role.as_deref())?;
    Ok(())
}

/// Decode the `filters` query parameter, a JSON-encoded string map.
/// Unusable input degrades to no filtering rather than an error.
fn parse_filters(raw: Option<&str>) -> HashMap<String, String> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return HashMap::new();
    };
    match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "ignoring malformed filters parameter");
            HashMap::new()
        }
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .map_err(datacat_core::Error::from)?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    sort_by: Option<String>,
    sort_order: Option<String>,
}

async fn run_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<search::SearchResult>, ApiError> {
    let ctx = state.schema().await;

    let sort_order = params
        .sort_order
        .as_deref()
        .unwrap_or("desc")
        .parse()
        .map_err(ApiError::Core)?;

    let request = SearchRequest {
        query: params.q.unwrap_or_default(),
        limit: params.limit.unwrap_or(DEFAULT_LIMIT),
        offset: params.offset.unwrap_or(0),
        sort_by: params
            .sort_by
            .unwrap_or_else(|| "last_edited_at".to_string()),
        sort_order,
    };

    let result = search::run_search(&state.pool, &ctx.cache, &ctx.plan, &request).await?;
    Ok(Json(result))
}

async fn schema_payload(State(state): State<Arc<AppState>>) -> Json<Value> {
    let ctx = state.schema().await;
    Json(schema_info::build_schema_payload(&ctx.cache, &state.config))
}

async fn refresh_schema(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize_mutation(&state, &headers)?;
    state.reload_schema().await?;
    Ok(Json(json!({"message": "schema cache reloaded"})))
}

async fn sort_fields(State(state): State<Arc<AppState>>) -> Json<Value> {
    let ctx = state.schema().await;
    Json(schema_info::sorting_fields_payload(&ctx.cache))
}

#[derive(Deserialize)]
struct DropdownParams {
    filters: Option<String>,
}

async fn dropdown(
    State(state): State<Arc<AppState>>,
    Path(entity_key): Path<String>,
    Query(params): Query<DropdownParams>,
) -> Result<Json<Value>, ApiError> {
    let ctx = state.schema().await;
    let filters = parse_filters(params.filters.as_deref());
    let items =
        navigation::dropdown_items(&state.pool, &ctx.cache, &entity_key, &filters).await?;
    Ok(Json(json!({"data": items})))
}

#[derive(Deserialize)]
struct EntitySearchParams {
    filters: Option<String>,
    search: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn entity_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EntitySearchParams>,
) -> Result<Json<search::SearchResult>, ApiError> {
    let ctx = state.schema().await;
    let filters = parse_filters(params.filters.as_deref());
    let result = navigation::generic_search(
        &state.pool,
        &ctx.cache,
        &ctx.plan,
        &filters,
        params.search.as_deref().unwrap_or(""),
        params.page.unwrap_or(1),
        params.limit.unwrap_or(DEFAULT_LIMIT),
    )
    .await?;
    Ok(Json(result))
}

async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let ctx = state.schema().await;
    let entity = entities::get_entity_by_id(&state.pool, &ctx.cache, &ctx.plan, id).await?;
    Ok(Json(entity))
}

async fn update_entity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(update): Json<serde_json::Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    authorize_mutation(&state, &headers)?;
    let ctx = state.schema().await;
    let entity =
        entities::update_entity(&state.pool, &ctx.cache, &ctx.plan, id, &update).await?;
    Ok(Json(entity))
}

#[derive(Deserialize)]
struct DeleteRequest {
    ids: Vec<i64>,
}

async fn delete_entities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DeleteRequest>,
) -> Result<Json<entities::DeleteReport>, ApiError> {
    authorize_mutation(&state, &headers)?;
    let ctx = state.schema().await;
    let report = entities::delete_entities(&state.pool, &ctx.cache, &request.ids).await?;
    Ok(Json(report))
}

async fn import(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize_mutation(&state, &headers)?;
    let ctx = state.schema().await;
    let report = ingest::import_records(&state.pool, &ctx.cache, &body).await?;
    Ok(Json(json!({
        "message": format!(
            "imported {} records ({} failed)",
            report.processed, report.failed
        ),
    })))
}

async fn session_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<datacat_auth::SessionStatus> {
    Json(validate_user_session(&headers, &state.auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_filters() {
        let filters = parse_filters(Some(r#"{"campaign_name": "Winter2023"}"#));
        assert_eq!(filters.get("campaign_name").unwrap(), "Winter2023");

        assert!(parse_filters(None).is_empty());
        assert!(parse_filters(Some("")).is_empty());
        assert!(parse_filters(Some("{broken")).is_empty());
    }
}
