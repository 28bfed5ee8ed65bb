use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{BatchRun, RunScope, RunSource, RunSummary};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/batch-runs",
            post(trigger_batch_run).get(recent_batch_runs),
        )
        .route("/admin/batch-runs/cancel", post(cancel_batch_run))
        .route("/admin/portfolios/:id/onboard", post(onboard_portfolio))
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    /// Restrict the run to one portfolio; omitted means the whole universe.
    pub portfolio_id: Option<Uuid>,
    #[serde(default)]
    pub backfill: bool,
}

async fn trigger_batch_run(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Result<Json<RunSummary>, AppError> {
    info!(
        "POST /admin/batch-runs - trigger (portfolio={:?}, backfill={})",
        request.portfolio_id, request.backfill
    );

    let scope = match request.portfolio_id {
        Some(portfolio_id) => RunScope::SinglePortfolio { portfolio_id },
        None => RunScope::Universe,
    };

    let summary = state
        .orchestrator
        .run_batch(scope, request.backfill, RunSource::Admin)
        .await?;
    Ok(Json(summary))
}

async fn recent_batch_runs(
    State(state): State<AppState>,
) -> Result<Json<Vec<BatchRun>>, AppError> {
    let runs = state.run_history.recent_runs(50).await?;
    Ok(Json(runs))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

async fn cancel_batch_run(
    State(state): State<AppState>,
) -> Result<Json<CancelResponse>, AppError> {
    info!("POST /admin/batch-runs/cancel");
    let cancelled = state.orchestrator.cancel_active_run();
    Ok(Json(CancelResponse { cancelled }))
}

async fn onboard_portfolio(
    State(state): State<AppState>,
    Path(portfolio_id): Path<Uuid>,
) -> Result<Json<RunSummary>, AppError> {
    info!("POST /admin/portfolios/{}/onboard", portfolio_id);
    let summary = state.onboarding.backfill_new_portfolio(portfolio_id).await?;
    Ok(Json(summary))
}
