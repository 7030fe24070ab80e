//! Liveness and load summary.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub active_streams: usize,
    pub tracked_deliveries: usize,
    pub connections: usize,
    pub uptime_secs: u64,
}

/// GET /health and GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let start = Instant::now();
    let status = HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_streams: state.streams.active_count(),
        tracked_deliveries: state.coordinator.get_statistics().total,
        connections: state.transport.connection_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    };
    Json(ApiResponse::timed(status, start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handlers::testing::test_state;
    use courier_core::transport::Transport;

    #[tokio::test]
    async fn test_health_reports_connections() {
        let (state, _dir) = test_state().await;
        let _rx = state.transport.connect("bob", "s1").unwrap();

        let Json(resp) = health(State(state)).await;
        let body = resp.data.unwrap();
        assert_eq!(body.status, "ok");
        assert_eq!(body.connections, 1);
        assert_eq!(body.active_streams, 0);
        assert_eq!(body.tracked_deliveries, 0);
    }
}
