use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

use crate::billing::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("organisation not found")]
    NotFound,
    #[error("credit limit reached")]
    LimitReached,
    #[error("organisation is being updated concurrently, try again")]
    Contention,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::LimitReached => StatusCode::FORBIDDEN,
            AppError::Contention => StatusCode::CONFLICT,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
