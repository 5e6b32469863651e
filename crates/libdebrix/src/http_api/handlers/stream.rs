use axum::Extension;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use debrix_core::StreamId;
use tracing::debug;

use super::ApiState;
use crate::auth::AuthInfo;
use crate::{ApiError, Error};

pub(crate) async fn h_stream(
    State(session): State<ApiState>,
    Path((_user_data, media_type, id)): Path<(String, String, String)>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<impl IntoResponse, ApiError> {
    // The SDK route shape is `/stream/{type}/{id}.json`; the suffix lands
    // inside the last path segment.
    let id = id
        .strip_suffix(".json")
        .ok_or_else(|| Error::BadRequest("expected an id ending in .json".to_string()))?;
    if media_type != "movie" && media_type != "series" {
        return Err(Error::BadRequest(format!("unsupported type {media_type:?}")).into());
    }
    let id: StreamId = id
        .parse()
        .map_err(|e: debrix_core::Error| Error::BadRequest(e.to_string()))?;

    debug!(%id, provider = %auth.provider, "stream discovery");
    let streams = session.discover_streams(&id, &auth).await?;
    Ok(axum::Json(serde_json::json!({ "streams": streams })))
}
