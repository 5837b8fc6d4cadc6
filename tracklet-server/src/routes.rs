use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{admin, handlers};

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/scheduler/pause", post(admin::pause_scheduler))
        .route("/scheduler/resume", post(admin::resume_scheduler))
        .route("/scheduler/status", get(admin::scheduler_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin,
        ));

    Router::new()
        .route(
            "/api/v1/shipments",
            get(handlers::list_shipments).post(handlers::create_shipment),
        )
        .route(
            "/api/v1/shipments/{id}",
            get(handlers::get_shipment)
                .patch(handlers::update_shipment)
                .delete(handlers::delete_shipment),
        )
        .route(
            "/api/v1/shipments/{id}/refresh",
            post(handlers::refresh_shipment),
        )
        .route(
            "/api/v1/shipments/{id}/events",
            get(handlers::list_events),
        )
        .route("/healthz", get(handlers::health))
        .nest("/api/v1/admin", admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
