use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::forms::FormErrors;
use crate::models::ApiResponse;
use crate::store::StoreError;

pub const LOGIN_URL: &str = "/login";

#[derive(Error, Debug)]
pub enum AppError {
    /// Submitted form failed validation; the form is shown again with its errors
    #[error("Invalid form submission")]
    Invalid(FormErrors),
    #[error("Login required")]
    Unauthenticated { next: String },
    #[error("{message}")]
    BadRequest {
        message: String,
        redirect: Option<String>,
    },
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Store error: {0}")]
    Store(StoreError),
    #[error("Password hashing failed: {0}")]
    Password(#[from] bcrypt::BcryptError),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    pub fn bad_request(message: impl Into<String>, redirect: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            redirect: Some(redirect.into()),
        }
    }
}

/// `/login?next=<path>` so the user comes back after signing in
pub fn login_redirect_url(next: &str) -> String {
    match serde_urlencoded::to_string([("next", next)]) {
        Ok(query) => format!("{}?{}", LOGIN_URL, query),
        Err(_) => LOGIN_URL.to_string(),
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Invalid(_) => StatusCode::OK,
            AppError::Unauthenticated { .. } => StatusCode::FOUND,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) | AppError::Password(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            AppError::Invalid(errors) => {
                HttpResponse::build(status).json(ApiResponse::<()>::invalid(errors.clone()))
            }
            AppError::Unauthenticated { next } => HttpResponse::build(status)
                .insert_header((header::LOCATION, login_redirect_url(next)))
                .finish(),
            AppError::BadRequest { message, redirect } => {
                let mut body = ApiResponse::<()>::error(message.clone());
                if let Some(url) = redirect {
                    body = body.with_redirect(url.clone());
                }
                HttpResponse::build(status).json(body)
            }
            AppError::Forbidden(_) | AppError::NotFound(_) => {
                HttpResponse::build(status).json(ApiResponse::<()>::error(self.to_string()))
            }
            AppError::Store(_) | AppError::Password(_) | AppError::Internal(_) => {
                log::error!("{}", self);
                HttpResponse::build(status).json(ApiResponse::<()>::error("Internal server error"))
            }
        }
    }
}
