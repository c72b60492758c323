use axum::{extract::State, http::StatusCode, response::Json};
use diesel::prelude::*;
use diesel::sql_query;
use serde_json::json;

use crate::state::AppState;

/// Reports liveness plus whether a pooled connection answers.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match state.db() {
        Ok(mut conn) => sql_query("SELECT 1").execute(&mut conn).is_ok(),
        Err(_) => false,
    };
    let (status, label) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (status, Json(json!({ "status": label, "database": database })))
}
