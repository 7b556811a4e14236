//! Errors of the backend client.

use thiserror::Error;
use tunnel_engine::EngineError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid endpoint configuration
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// The backend could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend answered with a status other than 200
    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not what the backend promises
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Connection(err.to_string())
        }
    }
}

impl From<ApiError> for EngineError {
    fn from(err: ApiError) -> Self {
        EngineError::BackendUnavailable(err.to_string())
    }
}
