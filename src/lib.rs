//! Core library for Datasight.  Wires the HTTP handlers to the table
//! parser, spike detector and Granite insight client.  The binary in
//! `main.rs` only adds logging setup and the listener.

mod config;
pub mod granite;
pub mod spike;
pub mod table;

pub use config::{AppConfig, Credentials, GraniteConfig};

use std::sync::Arc;

use axum::extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::granite::{GraniteClient, InsightError, InsightSource};
use crate::spike::SpikeFinding;
use crate::table::{ChartData, Table};

/// Rows included in the summary preview and in the prompt.
const PREVIEW_ROWS: usize = 5;
/// Review uploads are truncated to this many characters before prompting.
const REVIEW_MAX_CHARS: usize = 500;

/// Upload summary for the CSV branch.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub preview: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadResponse {
    SalesData {
        summary: Summary,
        ai_insight: String,
        spike_info: Option<SpikeFinding>,
        chart_data: ChartData,
    },
    ReviewData {
        content: String,
        ai_insight: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct ExploreSpikeRequest {
    pub product: Option<String>,
    /// Accepted for wire compatibility; not fed into the prompt.
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExploreResponse {
    pub insight: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Shared application state.  Cheap to clone; the insight source is behind
/// an `Arc` so tests can swap in a stub.
#[derive(Clone)]
pub struct AppState {
    pub insight: Arc<dyn InsightSource>,
    pub max_upload_bytes: Option<usize>,
}

impl AppState {
    pub fn new(insight: Arc<dyn InsightSource>, max_upload_bytes: Option<usize>) -> Self {
        Self {
            insight,
            max_upload_bytes,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(GraniteClient::new(config.granite.clone())),
            config.max_upload_bytes,
        )
    }
}

/// Build state from environment variables.  Credentials are resolved here,
/// once, and injected into the client; absent credentials are not an error
/// until an insight is actually requested.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    Ok(AppState::from_config(&AppConfig::from_env()?))
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    let router = Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz_handler))
        .route("/upload", post(upload_handler))
        .route("/explore-spike", post(explore_spike_handler));

    let router = if let Some(limit) = max_upload_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler() -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(json)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Insight failures ride in-band: the error text takes the place of the
/// model output on an otherwise successful response.  Existing clients
/// depend on this, so only the tagged result inside the process knows the
/// difference.
fn render_insight(result: Result<String, InsightError>) -> String {
    match result {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "insight unavailable, returning error text in-band");
            err.to_string()
        }
    }
}

struct FileUpload {
    filename: String,
    bytes: axum::body::Bytes,
}

/// Pull the `file` part out of the multipart stream.  Other parts are
/// skipped.  Returns `Ok(None)` when no `file` part exists.
async fn read_file_part(multipart: &mut Multipart) -> Result<Option<FileUpload>, Response> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(err) => {
                return Err(error_response(StatusCode::BAD_REQUEST, &err.to_string()));
            }
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                return Err(error_response(StatusCode::BAD_REQUEST, &err.to_string()));
            }
        };
        return Ok(Some(FileUpload { filename, bytes }));
    }
}

/// Handler for `POST /upload`.  Dispatches on the filename suffix: `.csv`
/// uploads are parsed, scanned for spikes and summarised; `.txt` uploads
/// are truncated and treated as a customer review.
async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match read_file_part(&mut multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return error_response(StatusCode::BAD_REQUEST, "No file part"),
        Err(response) => return response,
    };
    if upload.filename.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No selected file");
    }

    if upload.filename.ends_with(".csv") {
        handle_csv_upload(&state, &upload).await
    } else if upload.filename.ends_with(".txt") {
        handle_review_upload(&state, &upload).await
    } else {
        tracing::info!(filename = %upload.filename, "rejected unsupported upload");
        error_response(StatusCode::BAD_REQUEST, "Unsupported file type.")
    }
}

async fn handle_csv_upload(state: &AppState, upload: &FileUpload) -> Response {
    let table = match Table::from_csv(&upload.bytes) {
        Ok(table) => table,
        Err(err) => {
            tracing::warn!(filename = %upload.filename, error = %err, "CSV parse failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
    };

    let summary = Summary {
        columns: table.column_names(),
        row_count: table.row_count,
        preview: table.preview(PREVIEW_ROWS),
    };

    let spike_info = spike::detect(&table);
    if let Some(finding) = &spike_info {
        tracing::info!(column = %finding.product, "spike detected");
    }

    let prompt = format!(
        "You are an AI business strategist. Analyze this data:\n{}",
        summary.preview
    );
    let ai_insight = render_insight(state.insight.insight(&prompt).await);
    let chart_data = table.chart_series();

    (
        StatusCode::OK,
        Json(UploadResponse::SalesData {
            summary,
            ai_insight,
            spike_info,
            chart_data,
        }),
    )
        .into_response()
}

async fn handle_review_upload(state: &AppState, upload: &FileUpload) -> Response {
    let text = match std::str::from_utf8(&upload.bytes) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(filename = %upload.filename, error = %err, "review decode failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
    };
    let content: String = text.chars().take(REVIEW_MAX_CHARS).collect();

    let prompt = format!(
        "Analyze this customer review and give 2-3 suggestions:\n{}",
        content
    );
    let ai_insight = render_insight(state.insight.insight(&prompt).await);

    (
        StatusCode::OK,
        Json(UploadResponse::ReviewData {
            content,
            ai_insight,
        }),
    )
        .into_response()
}

/// Handler for `POST /explore-spike`.  Asks the model why a product spiked.
async fn explore_spike_handler(
    State(state): State<AppState>,
    payload: Result<Json<ExploreSpikeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, &rejection.body_text());
        }
    };

    let product = match request.product.as_deref().filter(|p| !p.is_empty()) {
        Some(product) => product.to_string(),
        None => return error_response(StatusCode::BAD_REQUEST, "Product not specified."),
    };
    if request.reason.is_some() {
        tracing::debug!(product = %product, "explore-spike reason supplied but unused");
    }

    let prompt = format!(
        "There was a sudden spike in {}. Explore possible reasons for this change and suggest actions.",
        product
    );
    let insight = render_insight(state.insight.insight(&prompt).await);

    (StatusCode::OK, Json(ExploreResponse { insight })).into_response()
}
