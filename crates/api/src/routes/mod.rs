pub mod dlq;
pub mod health;
pub mod performance;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(dlq::router())
        .merge(performance::router())
        .with_state(state)
}
