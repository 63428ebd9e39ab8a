//! Status routes — the renderer-facing view of the store.
//!
//! Strictly read-only: every handler works on a deep copy the store hands
//! out, so no request can observe or disturb an in-flight refresh.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};

use crate::docker::inventory::ContainerInfo;
use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/containers", get(containers))
        .route("/api/projects", get(projects))
        .with_state(state)
}

/// Bind the status listener and serve until `shutdown` resolves.
pub async fn serve(
    state: SharedState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.ui_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("status surface listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn containers(State(state): State<SharedState>) -> Json<Vec<ContainerInfo>> {
    Json(state.store.get_all())
}

async fn projects(
    State(state): State<SharedState>,
) -> Json<BTreeMap<String, Vec<ContainerInfo>>> {
    Json(state.store.group_by_project())
}

/// Minimal grouped listing for a browser; the full renderer lives outside
/// this process and consumes the JSON routes.
async fn index(State(state): State<SharedState>) -> Html<String> {
    let mut page = String::from("<html><body><h1>Tracked containers</h1>");
    for (project, members) in state.store.group_by_project() {
        page.push_str(&format!("<h2>{}</h2><ul>", project));
        for info in members {
            let bindings: Vec<String> = info
                .bindings
                .iter()
                .map(|b| {
                    if b.host_port == b.original_port {
                        b.to_string()
                    } else {
                        format!("{} (was {})", b, b.original_port)
                    }
                })
                .collect();
            page.push_str(&format!(
                "<li>{} [{}] {}</li>",
                info.name,
                info.status,
                bindings.join(", ")
            ));
        }
        page.push_str("</ul>");
    }
    page.push_str("</body></html>");
    Html(page)
}
