mod redirect;
mod status;
mod stream;

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::{Router, routing::get};

use crate::session::Session;

pub(crate) type ApiState = Arc<Session>;

async fn h_manifest() -> impl IntoResponse {
    let json = serde_json::json!({
        "id": "community.debrix",
        "version": env!("CARGO_PKG_VERSION"),
        "name": "debrix",
        "description": "Instantly playable debrid streams from several torrent indexers",
        "resources": ["stream"],
        "types": ["movie", "series"],
        "catalogs": [],
        "idPrefixes": ["tt"],
        "behaviorHints": {"configurable": false},
    });
    axum::Json(json)
}

pub fn make_router(session: Arc<Session>) -> Router {
    let authed = Router::new()
        .route("/{user_data}/stream/{type}/{id}", get(stream::h_stream))
        .route(
            "/{user_data}/redirect/{fingerprint}",
            get(redirect::h_redirect),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            session.clone(),
            crate::auth::middleware,
        ));

    Router::new()
        .route("/manifest.json", get(h_manifest))
        .route("/{user_data}/manifest.json", get(h_manifest))
        .route("/status", get(status::h_status))
        .merge(authed)
        .with_state(session)
}
