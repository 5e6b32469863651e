use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::Request;
use tower_http::trace::DefaultOnResponse;
use tracing::debug_span;

use crate::session::Session;

mod handlers;

pub use handlers::make_router;

/// The HTTP server for the addon API.
pub struct HttpApi {
    session: Arc<Session>,
}

impl HttpApi {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Run the HTTP server forever on the given listener.
    pub async fn run(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let cors_layer = {
            use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin};
            // Media-center front-ends are arbitrary web apps; the API is
            // useless without an open CORS policy.
            tower_http::cors::CorsLayer::new()
                .allow_origin(AllowOrigin::any())
                .allow_methods(AllowMethods::any())
                .allow_headers(AllowHeaders::any())
        };

        let app = make_router(self.session)
            .layer(cors_layer)
            .layer(
                tower_http::trace::TraceLayer::new_for_http()
                    .make_span_with(|req: &Request| {
                        let method = req.method();
                        // The path carries the user's credential blob; log
                        // only the route-relevant tail.
                        let endpoint = req
                            .uri()
                            .path()
                            .rsplit('/')
                            .next()
                            .unwrap_or_default()
                            .to_owned();
                        debug_span!("request", %method, endpoint)
                    })
                    .on_response(DefaultOnResponse::new()),
            )
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .await
            .context("error running HTTP API")
    }
}
