//! nodewatch-dashboard — read-only status surface.
//!
//! Renders the node registry as a chat-friendly text report and an HTML
//! status page, and serves both over axum.
//!
//! # Routes
//!
//! | Route | Handler |
//! |---|---|
//! | `/status` | HTML status page |
//! | `/status.txt` | Text report (empty when all clear) |
//! | `/ping` | Liveness, always `pong` |
//! | `/api/v1/nodes` | Snapshot as JSON |

pub mod pages;
pub mod report;
pub mod views;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use nodewatch_state::NodeRegistry;

pub use report::ReportGenerator;

/// Shared state for status handlers.
#[derive(Clone)]
pub struct StatusState {
    pub registry: Arc<NodeRegistry>,
}

/// Build the status router.
pub fn status_router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(pages::status))
        .route("/status.txt", get(pages::status_text))
        .route("/ping", get(pages::ping))
        .route("/api/v1/nodes", get(pages::nodes))
        .with_state(state)
}
