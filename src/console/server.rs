// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use axum::{
    Router,
    extract::State,
    http::{Method, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::console::{routes, state::AppState};

const API_GROUP: &str = "alerting.kubesphere.io";
const API_VERSION: &str = "v2alpha1";

pub const API_PREFIX: &str = const_str::concat!("/kapis/", API_GROUP, "/", API_VERSION);

/// Serves the API until the listener fails.
pub async fn run(
    port: u16,
    state: AppState,
    request_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state, request_timeout);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("alerting API listening on http://{}{}", addr, API_PREFIX);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Requests running past `request_timeout` are dropped, which cancels any
/// store or engine call still in flight.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(ready_check))
        .nest(API_PREFIX, api_routes())
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(routes::rule_routes())
        .merge(routes::builtin_routes())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
    }
}
