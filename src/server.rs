use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::database::Database;
use crate::models::{AccountId, DashboardData, SyncReport};
use crate::stats::{
    average_monthly_gain, compound_forecast, monthly_gains, ForecastPoint, MonthlyGain,
};
use crate::sync::run_sync;
use crate::upstream::StatsApiClient;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const SYNC_SECRET_HEADER: &str = "x-sync-secret";
const DEFAULT_FORECAST_MONTHS: u32 = 12;
const MAX_FORECAST_MONTHS: u32 = 120;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub cache: TtlCache,
    pub upstream: Arc<StatsApiClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sync", get(trigger_sync))
        .route("/dashboard", get(dashboard))
        .route("/stats", get(account_stats))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Triggers one sync pass. Failures ride back inside the report with a 200
/// so the cron caller can inspect partial results programmatically; the only
/// non-200 here is the shared-secret check.
async fn trigger_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SyncReport>, AppError> {
    if let Some(expected) = state.config.sync_secret.as_deref() {
        let provided = headers
            .get(SYNC_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            return Err(AppError::unauthorized(format!(
                "missing or invalid {} header",
                SYNC_SECRET_HEADER
            )));
        }
    }

    let report = run_sync(&state.config, &state.upstream, &state.db, &state.cache).await;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct AccountQuery {
    id: Option<String>,
}

/// 404 only when the store has nothing at all for the account; partial data
/// comes back as a 200 and the frontend renders whichever half is present.
async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<DashboardData>, AppError> {
    let account_id = resolve_account_id(&state, query.id)?;
    let data = state.db.get_dashboard_data(&account_id).await;
    if data.is_empty() {
        return Err(AppError::not_found(format!(
            "no data stored for account {}",
            account_id
        )));
    }
    Ok(Json(data))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    id: Option<String>,
    months: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    monthly_gains: Vec<MonthlyGain>,
    average_monthly_gain: f64,
    forecast: Vec<ForecastPoint>,
}

async fn account_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, AppError> {
    let account_id = resolve_account_id(&state, query.id)?;
    let data = state.db.get_dashboard_data(&account_id).await;
    if data.is_empty() {
        return Err(AppError::not_found(format!(
            "no data stored for account {}",
            account_id
        )));
    }

    let monthly = monthly_gains(&data.daily_data);
    let average = average_monthly_gain(&monthly);
    let starting_balance = data
        .account
        .as_ref()
        .map(|account| account.balance)
        // daily data is sorted newest first
        .or_else(|| data.daily_data.first().map(|entry| entry.balance))
        .unwrap_or(0.0);
    let months = query
        .months
        .unwrap_or(DEFAULT_FORECAST_MONTHS)
        .min(MAX_FORECAST_MONTHS);

    Ok(Json(StatsResponse {
        average_monthly_gain: average,
        forecast: compound_forecast(starting_balance, average, months),
        monthly_gains: monthly,
    }))
}

fn resolve_account_id(state: &AppState, raw: Option<String>) -> Result<AccountId, AppError> {
    match raw {
        Some(raw) => {
            let id = AccountId::new(&raw);
            if id.is_empty() {
                return Err(AppError::bad_request("id must not be empty"));
            }
            Ok(id)
        }
        None => Ok(state.config.target_account_id.clone()),
    }
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
