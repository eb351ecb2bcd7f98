use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::error::FilterError;
use crate::filters::{FilterId, FilterRevision, FilterType, NewRevision};
use crate::registry::SnapshotSummary;

impl IntoResponse for FilterError {
    fn into_response(self) -> Response {
        let status = match &self {
            FilterError::NotFound { .. } => StatusCode::NOT_FOUND,
            FilterError::Validation(_) => StatusCode::BAD_REQUEST,
            FilterError::Compile { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            FilterError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FilterError::Execution { .. } | FilterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, FilterError>;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub registry_generation: u64,
    pub registry_entries: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.registry.current_snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        registry_generation: snapshot.generation(),
        registry_entries: snapshot.len(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub filter_type: Option<String>,
}

pub async fn list_filters(
    State(state): State<AdminState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<FilterId>> {
    let ids = match query.filter_type {
        Some(raw) => {
            let filter_type: FilterType = raw.parse()?;
            state.store.list_filter_ids_by_type(filter_type).await?
        }
        None => state.store.list_filter_ids().await?,
    };
    Ok(Json(ids.into_iter().collect()))
}

pub async fn list_revisions(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<FilterRevision>> {
    Ok(Json(state.store.list_revisions(&FilterId::from_raw(id)).await?))
}

pub async fn get_revision(
    State(state): State<AdminState>,
    Path((id, revision)): Path<(String, u64)>,
) -> ApiResult<FilterRevision> {
    Ok(Json(state.store.get_revision(&FilterId::from_raw(id), revision).await?))
}

pub async fn get_latest(State(state): State<AdminState>, Path(id): Path<String>) -> ApiResult<FilterRevision> {
    Ok(Json(state.store.get_latest_revision(&FilterId::from_raw(id)).await?))
}

pub async fn get_active(State(state): State<AdminState>, Path(id): Path<String>) -> ApiResult<FilterRevision> {
    Ok(Json(state.store.get_active_revision(&FilterId::from_raw(id)).await?))
}

pub async fn list_active(State(state): State<AdminState>) -> ApiResult<Vec<FilterRevision>> {
    Ok(Json(state.store.list_active_filters().await?))
}

pub async fn list_canaries(State(state): State<AdminState>) -> ApiResult<Vec<FilterRevision>> {
    Ok(Json(state.store.list_canary_filters().await?))
}

pub async fn add_revision(
    State(state): State<AdminState>,
    Json(new): Json<NewRevision>,
) -> Result<(StatusCode, Json<FilterRevision>), FilterError> {
    let rev = state.store.add_revision(new).await?;
    Ok((StatusCode::CREATED, Json(rev)))
}

pub async fn activate(
    State(state): State<AdminState>,
    Path((id, revision)): Path<(String, u64)>,
) -> ApiResult<FilterRevision> {
    Ok(Json(state.store.activate(&FilterId::from_raw(id), revision).await?))
}

pub async fn deactivate(
    State(state): State<AdminState>,
    Path((id, revision)): Path<(String, u64)>,
) -> ApiResult<FilterRevision> {
    Ok(Json(state.store.deactivate(&FilterId::from_raw(id), revision).await?))
}

pub async fn mark_canary(
    State(state): State<AdminState>,
    Path((id, revision)): Path<(String, u64)>,
) -> ApiResult<FilterRevision> {
    Ok(Json(state.store.mark_canary(&FilterId::from_raw(id), revision).await?))
}

pub async fn get_registry(State(state): State<AdminState>) -> Json<SnapshotSummary> {
    Json(state.registry.current_snapshot().summary())
}

pub async fn get_toggles(State(state): State<AdminState>) -> Json<Vec<String>> {
    Json(state.toggles.disabled())
}
