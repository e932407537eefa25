mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::workflow::WorkflowEngine;

pub use routes::{ApiError, DispatchResponse, ListParams};

pub struct Server {
    engine: Arc<WorkflowEngine>,
}

impl Server {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub fn build_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::export_metrics))
            .route("/events", post(routes::dispatch_event))
            .route("/workflows/{id}/executions", get(routes::list_executions))
            .route("/executions/{id}", get(routes::get_execution))
            .route("/executions/{id}/cancel", post(routes::cancel_execution))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
