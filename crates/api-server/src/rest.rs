//! REST handlers for ad delivery, campaign authoring, the creative pool and
//! operational endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use spotline_core::{Ad, Campaign, SpotlineError};
use spotline_delivery::{vast, BudgetStatus, DeliveryEngine};
use spotline_store::{AnyStore, CampaignStore, ImpressionLedger};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub type Engine = DeliveryEngine<AnyStore, AnyStore>;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<AnyStore>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<AnyStore>, engine: Arc<Engine>, node_id: impl Into<String>) -> Self {
        Self {
            engine,
            store,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

/// Error returned by every handler. Client errors keep their message; server
/// errors are logged and answered with a generic one.
#[derive(Debug)]
pub struct ApiError(pub SpotlineError);

impl From<SpotlineError> for ApiError {
    fn from(e: SpotlineError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            SpotlineError::Validation(msg) => {
                metrics::counter!("api.validation_errors").increment(1);
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            SpotlineError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            SpotlineError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            other => {
                error!(error = %other, "Request failed");
                metrics::counter!("api.errors").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal processing error".to_string(),
                )
            }
        };
        if self.0.is_client_error() {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct VastQuery {
    #[serde(default, alias = "dma")]
    pub region: Option<String>,
    #[serde(default, rename = "clientId", alias = "client_id")]
    pub client_id: Option<String>,
}

/// GET /vast: select ads for the client and answer with a VAST document.
pub async fn get_vast(State(state): State<AppState>, Query(query): Query<VastQuery>) -> ApiResult<Response> {
    let client_id = query
        .client_id
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| SpotlineError::Validation("clientId query parameter is required".into()))?;
    let region = query.region.unwrap_or_default();

    let xml = state.engine.serve(&client_id, &region).await?;
    Ok(([(header::CONTENT_TYPE, vast::CONTENT_TYPE)], xml).into_response())
}

/// POST /api/campaigns
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(campaign): Json<Campaign>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    let created = state.store.create_campaign(campaign).await?;
    info!(campaign_id = %created.id, ads = created.ads.len(), "Campaign created via API");
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/campaigns
pub async fn list_campaigns(State(state): State<AppState>) -> ApiResult<Json<Vec<Campaign>>> {
    Ok(Json(state.store.list_campaigns().await?))
}

/// GET /api/campaigns/:id
pub async fn get_campaign(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.store.get_campaign(&id).await?))
}

/// PUT /api/campaigns/:id: the path id wins over any id in the body. An
/// empty ad list keeps the ads already stored.
pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut campaign): Json<Campaign>,
) -> ApiResult<Json<Campaign>> {
    campaign.id = id;
    if campaign.ads.is_empty() {
        campaign.ads = state.store.get_campaign(&campaign.id).await?.ads;
    }
    let updated = state.store.update_campaign(campaign).await?;
    info!(campaign_id = %updated.id, ads = updated.ads.len(), "Campaign updated via API");
    Ok(Json(updated))
}

/// DELETE /api/campaigns/:id
pub async fn delete_campaign(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.store.delete_campaign(&id).await?;
    info!(campaign_id = %id, "Campaign deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/ads/available
pub async fn list_available_ads(State(state): State<AppState>) -> ApiResult<Json<Vec<Ad>>> {
    Ok(Json(state.store.get_available_ads().await?))
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub media_url: String,
}

/// GET /api/ads/available/lookup?media_url=..
pub async fn lookup_available_ad(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<Json<Ad>> {
    Ok(Json(state.store.get_available_ad_by_media_url(&query.media_url).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeedResponse {
    pub inserted: usize,
    pub ads: Vec<Ad>,
}

/// POST /api/ads/available: add creatives to the pool, skipping known media URLs.
pub async fn seed_available_ads(
    State(state): State<AppState>,
    Json(ads): Json<Vec<Ad>>,
) -> ApiResult<Json<SeedResponse>> {
    let inserted = state.store.seed_available_ads(ads).await?;
    let ads = state.store.get_available_ads().await?;
    Ok(Json(SeedResponse { inserted, ads }))
}

/// GET /api/clients/:client_id/budget
pub async fn client_budget(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<BudgetStatus>> {
    Ok(Json(state.engine.budget(&client_id).await?))
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness check.
/// Returns 200 only when the impression ledger answers queries.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store.sum_duration_since("", Utc::now()).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /live: Liveness check.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SpotlineError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (SpotlineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (SpotlineError::Conflict("x".into()), StatusCode::CONFLICT),
            (SpotlineError::Persistence("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (SpotlineError::Codec("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_vast_query_aliases() {
        let q: VastQuery = serde_json::from_str(r#"{"dma":"10","client_id":"c1"}"#).unwrap();
        assert_eq!(q.region.as_deref(), Some("10"));
        assert_eq!(q.client_id.as_deref(), Some("c1"));

        let q: VastQuery = serde_json::from_str(r#"{"region":"10","clientId":"c2"}"#).unwrap();
        assert_eq!(q.client_id.as_deref(), Some("c2"));
    }
}
