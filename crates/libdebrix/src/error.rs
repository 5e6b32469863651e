use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::{Serialize, Serializer};

/// Service-wide error taxonomy.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("missing user data")]
    Unauthorized,
    #[error("debrid provider rejected the credential")]
    InvalidCredential,
    #[error("debrid account is locked")]
    AccountLocked,
    #[error("no playable stream")]
    NotFound,
    #[error("{0} timed out")]
    TimedOut(String),
    #[error("unexpected response from {endpoint}: {message}")]
    UpstreamProtocol { endpoint: String, message: String },
    #[error("all torrent sources failed: {0}")]
    AllSourcesFailed(String),
    #[error(transparent)]
    Infra(#[from] anyhow::Error),
}

impl Error {
    pub fn upstream(endpoint: impl AsRef<str>, message: impl Into<String>) -> Error {
        Error::UpstreamProtocol {
            endpoint: endpoint.as_ref().to_string(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::InvalidCredential | Error::AccountLocked => StatusCode::FORBIDDEN,
            // A failed fan-out looks like "no torrents" to the caller.
            Error::NotFound | Error::AllSourcesFailed(_) => StatusCode::NOT_FOUND,
            Error::TimedOut(_) | Error::UpstreamProtocol { .. } | Error::Infra(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::Unauthorized => "unauthorized",
            Error::InvalidCredential => "invalid_credential",
            Error::AccountLocked => "account_locked",
            Error::NotFound => "not_found",
            Error::TimedOut(_) => "timed_out",
            Error::UpstreamProtocol { .. } => "upstream_protocol",
            Error::AllSourcesFailed(_) => "all_sources_failed",
            Error::Infra(_) => "internal_error",
        }
    }
}

/// HTTP envelope for [`Error`]. Convenience error type for handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: Error,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn with_status(self, status: StatusCode) -> Self {
        Self { status, ..self }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            status: error.status(),
            error,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Error::Infra(error).into()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct SerializedError<'a> {
            error_kind: &'a str,
            human_readable: String,
            status: u16,
            status_text: String,
        }
        SerializedError {
            error_kind: self.error.kind(),
            human_readable: format!("{self}"),
            status: self.status.as_u16(),
            status_text: self.status.to_string(),
        }
        .serialize(serializer)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = axum::Json(&self).into_response();
        *response.status_mut() = self.status;
        response
    }
}
