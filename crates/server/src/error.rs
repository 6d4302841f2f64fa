use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use vidslim_core::config::ConfigError;
use vidslim_core::error::{ApiError, ErrorEnvelope};
use vidslim_scanner::ScanError;

use crate::manager::ControlError;
use crate::settings::SettingsError;

/// Newtype wrapper so we can implement `IntoResponse` in this crate.
pub struct AppError(pub ApiError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::from(&self.0);
        (status, Json(envelope)).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl From<ControlError> for AppError {
    fn from(e: ControlError) -> Self {
        let api = match e {
            ControlError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ControlError::InvalidState { .. } | ControlError::NotRunning => {
                ApiError::Conflict(e.to_string())
            }
            ControlError::Restore(_) => ApiError::Conflict(e.to_string()),
            ControlError::Db(_) => ApiError::Internal(e.to_string()),
        };
        Self(api)
    }
}

impl From<ScanError> for AppError {
    fn from(e: ScanError) -> Self {
        let api = match e {
            ScanError::AlreadyRunning => ApiError::Conflict(e.to_string()),
            ScanError::InvalidPattern { .. } => ApiError::BadRequest(e.to_string()),
            ScanError::Db(_) | ScanError::Io(_) => ApiError::Internal(e.to_string()),
        };
        Self(api)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self(ApiError::BadRequest(e.to_string()))
    }
}

impl From<SettingsError> for AppError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Config(e) => e.into(),
            SettingsError::Db(e) => Self(ApiError::Internal(format!("db error: {e}"))),
        }
    }
}
