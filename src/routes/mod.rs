use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod consultations;
pub mod health;

/// Multipart overhead allowed on top of the largest accepted file.
const BODY_LIMIT_HEADROOM: u64 = 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        tracing::warn!(origin = value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let consultation_routes = Router::new()
        .route(
            "/",
            get(consultations::list_consultations).post(consultations::create_consultation),
        )
        .route("/statistics", get(consultations::consultation_statistics))
        .route("/:id", get(consultations::get_consultation))
        .route("/:id/status", patch(consultations::update_status))
        .route("/:id/status-logs", get(consultations::list_status_logs))
        .route("/:id/withdraw", post(consultations::withdraw_consultation))
        .route("/:id/escalate", post(consultations::escalate_priority))
        .route("/:id/archive", post(consultations::archive_consultation))
        .route("/:id/unarchive", post(consultations::unarchive_consultation))
        .route(
            "/:id/confirm-delivery",
            post(consultations::confirm_delivery),
        )
        .route("/:id/lawyers", post(consultations::assign_lawyers))
        .route(
            "/:id/lawyers/:lawyer_id",
            delete(consultations::remove_lawyer),
        )
        .route("/:id/operators", post(consultations::assign_operators))
        .route("/:id/files", post(consultations::upload_file))
        .route(
            "/:id/files/:file_id",
            delete(consultations::delete_file),
        )
        .route(
            "/:id/files/:file_id/versions",
            get(consultations::file_versions),
        )
        .route(
            "/:id/files/:file_id/latest",
            get(consultations::latest_file_version),
        )
        .route(
            "/:id/files/:file_id/download",
            get(consultations::download_file),
        )
        .route(
            "/:id/files/:file_id/deliver",
            post(consultations::deliver_file),
        );

    let body_limit = usize::try_from(state.config.max_file_size.saturating_add(BODY_LIMIT_HEADROOM))
        .unwrap_or(usize::MAX);

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/consultations", consultation_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(
            protected_state,
        ));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
