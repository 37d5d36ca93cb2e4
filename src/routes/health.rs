use axum::{extract::State, http::StatusCode, Json};
use diesel::connection::SimpleConnection;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// Liveness plus a round trip to Postgres. Identity and storage services are
/// not probed.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = state
        .pool
        .get()
        .map_err(|err| err.to_string())
        .and_then(|mut conn| {
            conn.batch_execute("SELECT 1").map_err(|err| err.to_string())
        });

    match database_ok {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok",
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "health check could not reach the database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database: "unreachable",
                }),
            )
        }
    }
}
