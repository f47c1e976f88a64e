//! Step endpoints

use axum::{extract::State, routing::post, Json, Router};
use scout_common::envelope::{
    DiscoveryRequest, DiscoveryResponse, EnrichmentResponse, ItemRequest, StepResponse,
};

use crate::{stages, ApiResult, AppState};

/// POST /steps/discover
///
/// Source or registry failures return an error status; the caller treats
/// them as fatal for the run.
pub async fn discover(
    State(state): State<AppState>,
    Json(request): Json<DiscoveryRequest>,
) -> ApiResult<Json<DiscoveryResponse>> {
    let response = stages::discover(&state.steps, &request).await?;
    Ok(Json(response))
}

/// POST /steps/fetch
///
/// A failed fetch is still a 200 with `status: "failed"`.
pub async fn fetch(
    State(state): State<AppState>,
    Json(request): Json<ItemRequest>,
) -> ApiResult<Json<StepResponse>> {
    let response = stages::fetch(&state.steps, &request).await?;
    Ok(Json(response))
}

/// POST /steps/enrich
pub async fn enrich(
    State(state): State<AppState>,
    Json(request): Json<ItemRequest>,
) -> ApiResult<Json<EnrichmentResponse>> {
    let response = stages::enrich(&state.steps, &request).await?;
    Ok(Json(response))
}

pub fn step_routes() -> Router<AppState> {
    Router::new()
        .route("/steps/discover", post(discover))
        .route("/steps/fetch", post(fetch))
        .route("/steps/enrich", post(enrich))
}
