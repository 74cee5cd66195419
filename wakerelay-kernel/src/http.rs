/*!
 * API REST WAKERELAY - Front HTTP du kernel
 *
 * RÔLE : Expose le réveil de machines et l'état courant (résultats, monitoring).
 *
 * ROUTES :
 * - GET /health                 : toujours accessible
 * - POST /wake                  : { proxies: { "P1": [{name, mac}] }, options }
 * - GET|DELETE /results         : snapshot / purge des résultats
 * - GET|DELETE /monitors        : snapshot / purge des entrées de monitoring
 *
 * SÉCURITÉ : header x-api-key obligatoire (WAKERELAY_API_KEY) sauf /health.
 */

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wakerelay_kernel::{MonitorEntry, TargetSpec, WakeError, WakeOnLanReturn, WakeOptions, WakeOrchestrator};

pub const API_KEY_ENV: &str = "WAKERELAY_API_KEY";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<WakeOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct WakeBody {
    pub proxies: BTreeMap<String, Vec<TargetSpec>>,
    #[serde(default)]
    pub options: WakeOptions,
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var(API_KEY_ENV).unwrap_or_default();
    if expected.is_empty() {
        warn!("{} not set, API access denied", API_KEY_ENV);
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/wake", post(wake))
        .route("/results", get(get_results).delete(clear_results))
        .route("/monitors", get(get_monitors).delete(clear_monitors))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// POST /wake
async fn wake(
    State(app): State<AppState>,
    Json(body): Json<WakeBody>,
) -> Result<Json<Vec<WakeOnLanReturn>>, (StatusCode, Json<serde_json::Value>)> {
    info!("wake requested for {} proxy group(s)", body.proxies.len());
    let cancel = CancellationToken::new();
    match app
        .orchestrator
        .wake_up_and_monitor(&body.proxies, body.options, &cancel)
        .await
    {
        Ok(results) => Ok(Json(results)),
        Err(e @ WakeError::InvalidArgument(_)) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "ok": false, "msg": e.to_string() })),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "ok": false, "msg": e.to_string() })),
        )),
    }
}

// GET /results
async fn get_results(State(app): State<AppState>) -> Json<Vec<WakeOnLanReturn>> {
    Json(app.orchestrator.get_all_results())
}

// DELETE /results
async fn clear_results(State(app): State<AppState>) -> StatusCode {
    app.orchestrator.clear_results();
    StatusCode::NO_CONTENT
}

// GET /monitors
async fn get_monitors(State(app): State<AppState>) -> Json<Vec<MonitorEntry>> {
    Json(app.orchestrator.get_all_monitor_entries())
}

// DELETE /monitors
async fn clear_monitors(State(app): State<AppState>) -> StatusCode {
    app.orchestrator.clear_monitor_entries();
    StatusCode::NO_CONTENT
}
