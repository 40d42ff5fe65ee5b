use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::cache::CacheLookup;
use crate::context::IngestContext;
use crate::ingest::aggregator::AdapterStatus;
use crate::ingest::types::AdapterKind;

const DEFAULT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    ctx: Arc<IngestContext>,
}

/// Read-only surface over the cache/store plus the manual breaker reset.
pub fn router(ctx: Arc<IngestContext>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/articles/{ticker}", get(articles_latest))
        .route("/articles/{ticker}/{date}", get(articles_for_date))
        .route("/sources", get(sources))
        .route("/sources/{adapter}/reset", post(reset_source))
        .route("/cache/stats", get(cache_stats))
        .layer(CorsLayer::very_permissive())
        .with_state(AppState { ctx })
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: msg.into() })).into_response()
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn articles_latest(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 500);
    let ctx = &state.ctx;
    match ctx.cache().get_or_load(&ticker, ctx.store(), limit).await {
        Ok(Some(list)) => Json(list).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("no articles for {ticker}")),
        Err(e) => {
            tracing::warn!(error = ?e, ticker = %ticker, "article lookup failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "lookup failed")
        }
    }
}

async fn articles_for_date(
    State(state): State<AppState>,
    Path((ticker, date)): Path<(String, String)>,
) -> Response {
    let Ok(day) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
        return error(StatusCode::BAD_REQUEST, "date must be YYYY-MM-DD");
    };
    match state.ctx.cache().get_cached_articles_for_date(&ticker, day).await {
        Ok(CacheLookup::Hit(list)) => Json(list).into_response(),
        Ok(CacheLookup::Miss) => error(
            StatusCode::NOT_FOUND,
            format!("no snapshot for {ticker} on {day}"),
        ),
        Err(e) => {
            tracing::warn!(error = ?e, ticker = %ticker, "snapshot lookup failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "lookup failed")
        }
    }
}

async fn sources(State(state): State<AppState>) -> Json<Vec<AdapterStatus>> {
    Json(state.ctx.aggregator().status())
}

async fn reset_source(State(state): State<AppState>, Path(adapter): Path<String>) -> Response {
    match adapter.parse::<AdapterKind>() {
        Ok(kind) => {
            state.ctx.aggregator().reset_errors(kind);
            (StatusCode::OK, format!("reset {kind}")).into_response()
        }
        Err(e) => error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

async fn cache_stats(State(state): State<AppState>) -> Response {
    match state.ctx.cache().stats().await {
        Ok(s) => Json(s).into_response(),
        Err(e) => {
            tracing::warn!(error = ?e, "cache stats failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "stats unavailable")
        }
    }
}
