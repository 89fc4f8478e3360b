//! # API Handlers
//!
//! The subset of the Elasticsearch HTTP API Kibana needs for discovery
//! and visualizations. Searches block on storage, so they run on the
//! blocking pool.

use crate::search::{self, resolve_index, SearchContext, SearchError};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn error_response(e: SearchError) -> (StatusCode, Json<Value>) {
    (e.status(), Json(e.to_body()))
}

async fn run_blocking<F>(state: Arc<AppState>, job: F) -> ApiResult
where
    F: FnOnce(&SearchContext<'_>) -> Result<Value, SearchError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let context = SearchContext {
            backend: state.backend.as_ref(),
            tables: &state.tables,
            options: state.options,
        };
        job(&context)
    })
    .await;

    match result {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(e)) => {
            tracing::warn!("search failed: {}", e);
            Err(error_response(e))
        }
        Err(e) => {
            tracing::error!("search worker failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"type": "internal_error", "reason": e.to_string()}, "status": 500})),
            ))
        }
    }
}

/// Cluster info Kibana checks before anything else.
pub async fn cluster_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": "kq-hub",
        "cluster_name": "kq",
        "cluster_uuid": "_na_",
        "version": {
            "number": state.version,
            "build_hash": "_na_",
            "build_snapshot": false,
            "lucene_version": "6.6.1",
        },
        "tagline": "You Know, for Search",
    }))
}

pub async fn multi_search(State(state): State<Arc<AppState>>, body: String) -> ApiResult {
    run_blocking(state, move |context| context.multi_search(None, &body)).await
}

pub async fn index_multi_search(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    body: String,
) -> ApiResult {
    run_blocking(state, move |context| context.multi_search(Some(index.as_str()), &body)).await
}

pub async fn index_search(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    body: String,
) -> ApiResult {
    let body: Value = if body.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&body).map_err(|e| {
            error_response(SearchError::BadRequest(format!("malformed JSON: {}", e)))
        })?
    };
    run_blocking(state, move |context| context.search(&index, &body)).await
}

pub async fn field_caps(State(state): State<Arc<AppState>>, Path(index): Path<String>) -> ApiResult {
    let (schema, _) = resolve_index(&state.tables, &index).map_err(error_response)?;
    Ok(Json(search::field_caps(schema)))
}
