//! Status route handlers.
//!
//! Every handler takes a fresh snapshot and renders from it; none of them
//! waits on a probe in flight.

use axum::Json;
use axum::extract::State;
use axum::response::Html;
use tracing::debug;

use crate::StatusState;
use crate::report::ReportGenerator;
use crate::views::NodeListView;

pub async fn status(State(state): State<StatusState>) -> Html<String> {
    let snapshot = state.registry.all_nodes();
    debug!(nodes = snapshot.nodes.len(), in_error = snapshot.error_count(), "status page");
    Html(ReportGenerator::render_html(&snapshot))
}

/// Plain-text report; an empty body means nothing is in error.
pub async fn status_text(State(state): State<StatusState>) -> String {
    ReportGenerator::render_text(&state.registry.all_nodes())
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn nodes(State(state): State<StatusState>) -> Json<NodeListView> {
    Json(NodeListView::from_snapshot(&state.registry.all_nodes()))
}
