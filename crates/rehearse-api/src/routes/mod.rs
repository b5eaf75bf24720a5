//! API route modules.

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

pub mod evaluations;

/// Builds the authenticated `/api/v1` route tree.
#[must_use]
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    evaluations::routes()
}
