//! Chat gateway: a rate-limited HTTP front for an upstream chat-completion API
//! that fails over between several API keys.

use axum::routing::get;
use axum::{Router, middleware};
use std::sync::Arc;

pub mod clock;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod persona;
pub mod rate_limit;
pub mod state;

#[cfg(test)]
mod test_support;

use handlers::{
    apply_cors, chat_handler, health_handler, method_not_allowed, metrics_handler,
    preflight_handler,
};
use rate_limit::rate_limit_middleware;
pub use rate_limit::CHAT_PATHS;
use state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    // get() would also answer HEAD with the health body
    let chat_routes = get(health_handler)
        .head(method_not_allowed)
        .post(chat_handler)
        .options(preflight_handler)
        .fallback(method_not_allowed);

    let chat = Router::new()
        .route(CHAT_PATHS[0], chat_routes.clone())
        .route(CHAT_PATHS[1], chat_routes);

    // CORS wraps the gate so 429s carry it too
    Router::new()
        .merge(chat)
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::map_response(apply_cors))
        .with_state(state)
}
