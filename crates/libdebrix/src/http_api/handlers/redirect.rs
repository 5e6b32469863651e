use std::net::SocketAddr;

use axum::Extension;
use axum::extract::{ConnectInfo, Path, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use tracing::debug;

use super::ApiState;
use crate::ApiError;
use crate::auth::AuthInfo;

pub(crate) async fn h_redirect(
    State(session): State<ApiState>,
    Path((_user_data, fingerprint)): Path<(String, String)>,
    Extension(auth): Extension<AuthInfo>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, ApiError> {
    debug!(%fingerprint, "redirect requested");
    let url = session
        .resolve_redirect(&fingerprint, &auth, Some(addr.ip()))
        .await?;
    Ok((StatusCode::MOVED_PERMANENTLY, [(http::header::LOCATION, url)]).into_response())
}
