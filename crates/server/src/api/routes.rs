use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use super::{
    config, health, history, jobs, middleware::auth_middleware,
    middleware::metrics_middleware, providers, translate, wanted, webhook, ws,
};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Translation
        .route("/translate", post(translate::translate))
        .route("/translate/sync", post(translate::translate_sync))
        // Jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/status/{id}", get(jobs::job_status))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        // Wanted
        .route("/wanted", get(wanted::list_wanted))
        .route("/wanted", post(wanted::create_wanted))
        .route("/wanted/batch-search", post(wanted::batch_search))
        .route("/wanted/batch-search/status", get(wanted::batch_search_status))
        .route("/wanted/refresh", post(wanted::refresh))
        .route("/wanted/{id}/search", post(wanted::search_wanted))
        .route("/wanted/{id}/process", post(wanted::process_wanted))
        // Config
        .route("/config", get(config::get_config))
        .route("/config", put(config::put_config))
        // Providers
        .route("/providers", get(providers::list_providers))
        .route("/providers/search", post(providers::manual_search))
        .route("/providers/test/{name}", post(providers::test_provider))
        .route("/providers/{name}/reset", post(providers::reset_provider))
        // History
        .route("/history", get(history::list_history))
        // Inbound library-manager webhooks
        .route("/webhook/{source}", post(webhook::receive))
        // Detailed health needs auth; it exposes provider names and counters.
        .route("/health/detailed", get(health::health_detailed))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state.clone());

    let open_routes = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        // The WebSocket authenticates in-band with its first frame.
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes.merge(open_routes))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
