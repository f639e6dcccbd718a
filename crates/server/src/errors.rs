use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::types::Message;
use service::ServiceError;
use thiserror::Error;
use tracing::{debug, error};

/// A core failure on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self { Self(e) }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::InvalidName(_)
            | ServiceError::DatabaseExists
            | ServiceError::MissingPasscode
            | ServiceError::InvalidPasscode
            | ServiceError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ServiceError::DatabaseNotFound | ServiceError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = if self.0.is_internal() {
            error!(error = %self.0, "request failed");
            "An internal error occurred while processing the request.".to_string()
        } else {
            debug!(status = %status, error = %self.0, "request rejected");
            self.0.to_string()
        };
        (status, Json(Message::new(msg))).into_response()
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },
    #[error("server stopped: {0}")]
    Serve(#[source] std::io::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}
