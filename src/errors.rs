use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Template error: {0}")]
    TemplateError(#[from] tera::Error),

    #[error("Password error: {0}")]
    PasswordError(String),

    #[error("Identity error: {0}")]
    IdentityError(#[from] actix_identity::error::GetIdentityError),

    #[error("Login error: {0}")]
    LoginError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Not found")]
    NotFound,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

impl From<AppError> for std::io::Error {
    fn from(err: AppError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    }
}
