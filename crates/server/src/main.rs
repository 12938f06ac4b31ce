//! # gridcalc-server
//!
//! Serves published sheets. Other sheets run them through `RUN_WORKSHEET`,
//! which POSTs overrides to `/sheets/{id}/v0.1/json/` and reads back the
//! recalculated values.

mod store;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use gridcalc_core::{Calculator, RecalcConfig};
use gridcalc_http::HttpSheetClient;
use gridcalc_primitives::CellLocation;
use gridcalc_sheet::worksheet_to_api_json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::{PublishedSheet, SheetStore};
use tower_http::trace::TraceLayer;

const ADDR_ENV: &str = "GRIDCALC_ADDR";
const SHEETS_DIR_ENV: &str = "GRIDCALC_SHEETS_DIR";
const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_SHEETS_DIR: &str = "sheets";

/// Health check response.
#[derive(Serialize, Deserialize)]
pub struct Health {
    /// Server status ("ok" when healthy).
    pub status: String,
    /// Server version from Cargo.toml.
    pub version: String,
    /// Number of published sheets.
    pub sheets: usize,
}

#[derive(Clone)]
pub struct AppState {
    store: Arc<SheetStore>,
    calculator: Calculator,
    timeout: Duration,
}

impl AppState {
    pub fn new(store: SheetStore, calculator: Calculator) -> Self {
        let timeout = calculator.config().timeout;
        Self {
            store: Arc::new(store),
            calculator,
            timeout,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no sheet named '{0}'")]
    NotFound(String),
    #[error("invalid api key")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint handler.
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sheets: state.store.len(),
    })
}

async fn run_sheet_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(fields): Query<HashMap<String, String>>,
) -> Result<Json<JsonValue>, ApiError> {
    run_sheet(state, id, fields).await
}

async fn run_sheet_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(fields): Form<HashMap<String, String>>,
) -> Result<Json<JsonValue>, ApiError> {
    run_sheet(state, id, fields).await
}

/// Recalculate a copy of the published sheet with the request's overrides
/// and return its values.
async fn run_sheet(
    state: AppState,
    id: String,
    mut fields: HashMap<String, String>,
) -> Result<Json<JsonValue>, ApiError> {
    let published = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;
    let api_key = fields.remove("api_key");
    if !published.accepts(api_key.as_deref()) {
        tracing::warn!("rejected request for '{}': bad api key", id);
        return Err(ApiError::Forbidden);
    }

    let PublishedSheet {
        mut worksheet,
        usercode,
        ..
    } = published.clone();
    for (label, value) in &fields {
        let location = CellLocation::from_label(label)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        worksheet.set_formula_at(location, value);
    }

    let calculator = state.calculator.clone();
    let timeout = state.timeout;
    let worksheet = tokio::task::spawn_blocking(move || {
        let status = calculator.calculate_with_timeout(&mut worksheet, &usercode, timeout);
        tracing::info!("ran sheet '{}' with {} overrides: {:?}", id, fields.len(), status);
        worksheet
    })
    .await
    .map_err(|e| ApiError::Internal(format!("recalculation failed: {e}")))?;

    let json = worksheet_to_api_json(&worksheet).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json))
}

/// Create the application router.
///
/// This is separated from `main()` to allow testing.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/sheets/:id/v0.1/json/",
            get(run_sheet_get).post(run_sheet_post),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = RecalcConfig::from_env()?;
    let sheets_dir = PathBuf::from(
        std::env::var(SHEETS_DIR_ENV).unwrap_or_else(|_| DEFAULT_SHEETS_DIR.to_string()),
    );
    let store = SheetStore::load_dir(&sheets_dir)?;
    tracing::info!(
        "serving {} sheets from {}",
        store.len(),
        sheets_dir.display()
    );

    let remote = HttpSheetClient::with_timeout(config.timeout)?;
    let calculator = Calculator::new(config).with_remote(Arc::new(remote));
    let app = create_router(AppState::new(store, calculator));

    let addr = std::env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    println!("gridcalc-server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
