// Route table for the Codetrial API

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submissions", post(handlers::submit))
        .route(
            "/submissions/:id",
            get(handlers::get_submission).delete(handlers::cancel_submission),
        )
        .route("/sessions/:session_id/submissions", delete(handlers::cancel_session))
        .route("/tests", get(handlers::list_tests).post(handlers::create_test))
        .route("/tests/:id", get(handlers::get_test))
        .route("/languages", get(handlers::list_languages))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::export_metrics))
}
