//! HTTP routes.
//!
//! - `GET /healthz`
//! - `GET /logs/{name}?stdout=0|1&stderr=0|1&follow=0|1`

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use pipeline::LogService;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::ApiError;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub logs: Arc<LogService>,
    /// Ends open (followed) response bodies when the server shuts down.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/logs/{name}", get(logs_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn healthz_handler() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsParams {
    stdout: Option<String>,
    stderr: Option<String>,
    follow: Option<String>,
}

impl LogsParams {
    /// stdout is opt-in, stderr is opt-out, follow is opt-in.
    fn into_query(self, name: String) -> pipeline::Query {
        pipeline::Query {
            container_name: name,
            include_stdout: self.stdout.as_deref() == Some("1"),
            include_stderr: self.stderr.as_deref() != Some("0"),
            follow: self.follow.as_deref() == Some("1"),
            timestamps: false,
        }
    }
}

async fn logs_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<LogsParams>,
) -> Result<Response, ApiError> {
    let query = params.into_query(name);
    if query.selection().is_empty() {
        return Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], Body::empty()).into_response());
    }

    debug!(
        container_name = %query.container_name,
        stdout = query.include_stdout,
        stderr = query.include_stderr,
        follow = query.follow,
        "Serving logs"
    );
    let stream = state.logs.get_logs(&query).await?;
    let body = Body::from_stream(stream.take_until(state.shutdown.clone().cancelled_owned()));
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response())
}
