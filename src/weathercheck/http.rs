// Weathercheck - Weather station recorder and MQTT scraper
//
// Copyright 2025 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text;
use prometheus_client::registry::Registry;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

const TEXT_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Global state shared between all HTTP requests via Arc.
pub struct RequestState {
    registry: Registry,
}

impl RequestState {
    pub fn new(registry: Registry) -> Self {
        RequestState { registry }
    }
}

/// Render Prometheus metrics from a registry in the text exposition format. If an
/// error is encountered, an HTTP 500 will be returned and the error will be logged.
pub async fn text_metrics_handler(State(state): State<Arc<RequestState>>) -> Response {
    let mut buf = String::new();

    match text::encode(&mut buf, &state.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format");
            ([(CONTENT_TYPE, TEXT_FORMAT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics to text format", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn router(state: Arc<RequestState>) -> Router {
    Router::new()
        .route("/metrics", get(text_metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve metrics on `bind` until the process exits.
pub async fn serve(bind: SocketAddr, state: Arc<RequestState>) -> io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(message = "starting metrics server", address = %bind);
    axum::serve(listener, router(state)).await
}
