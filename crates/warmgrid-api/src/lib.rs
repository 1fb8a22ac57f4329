//! warmgrid-api — the HTTP session-assignment surface.
//!
//! Translates external requests into pool manager calls and formats the
//! responses; no pool logic lives here.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/session` | Assign a unit to a fresh session |
//! | DELETE | `/session/{session_id}` | Release a session's unit |
//! | GET | `/health` | Liveness probe |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use warmgrid_cluster::WorkloadClient;
use warmgrid_pool::PoolManager;

/// Shared state for API handlers.
pub struct ApiState<C> {
    pub manager: Arc<PoolManager<C>>,
}

// Manual impl: `#[derive(Clone)]` would demand `C: Clone`, but only the Arc
// is cloned.
impl<C> Clone for ApiState<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

/// Build the session API router.
pub fn build_router<C: WorkloadClient + 'static>(manager: Arc<PoolManager<C>>) -> Router {
    let state = ApiState { manager };

    Router::new()
        .route("/session", post(handlers::create_session::<C>))
        .route(
            "/session/{session_id}",
            delete(handlers::release_session::<C>),
        )
        .route("/health", get(handlers::health::<C>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
