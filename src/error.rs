use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error taxonomy with a defined propagation policy per kind.
#[derive(Error, Debug)]
pub enum AppError {
    /// C1: an adapter could not reach its remote source in time. The orchestrator
    /// treats this source's contribution as empty for the cycle and proceeds.
    #[error("source unavailable: {source}: {message}")]
    SourceUnavailable { source: String, message: String },

    /// C2: a record failed validation. Counted as `invalid_skipped`, never inserted.
    #[error("invalid record: {message}")]
    InvalidRecord { message: String },

    /// C3: on-conflict-do-nothing suppressed a row. Non-error, counted as `duplicate_skipped`.
    #[error("duplicate record")]
    DuplicateRecord,

    /// C3: the underlying database failed. Transaction rolled back; the ingest
    /// cycle for that table terminates and this propagates to the caller.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// C5: fewer than the configured minimum training rows were available.
    /// The (pollutant, horizon) pair is skipped and reported, not fatal.
    #[error("insufficient training data for {pollutant} at horizon {horizon}h: {count} rows")]
    InsufficientData {
        pollutant: String,
        horizon: u32,
        count: usize,
    },

    /// C6: no registry entry exists for the requested key, even after horizon fallback.
    #[error("no trained model for {pollutant} near horizon {horizon}h")]
    ModelMissing { pollutant: String, horizon: u32 },

    /// C6: a required feature (in particular the target pollutant's recent value)
    /// could not be assembled. MUST NOT be silently defaulted to zero.
    #[error("cannot assemble feature '{feature}': {message}")]
    FeatureMismatch { feature: String, message: String },

    /// C7: the pollutant concentration falls outside every defined breakpoint interval.
    #[error("AQI undefined for {pollutant} = {value}")]
    AqiOutOfRange { pollutant: String, value: f64 },

    /// Malformed request bodies / query parameters.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Anything else: configuration load failures, HTTP client construction, etc.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn source_unavailable<T: Into<String>, U: Into<String>>(source: T, message: U) -> Self {
        Self::SourceUnavailable {
            source: source.into(),
            message: message.into(),
        }
    }

    pub fn invalid_record<T: Into<String>>(message: T) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    pub fn feature_mismatch<T: Into<String>, U: Into<String>>(feature: T, message: U) -> Self {
        Self::FeatureMismatch {
            feature: feature.into(),
            message: message.into(),
        }
    }

    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable tag used in structured responses, distinct from the prose Display text.
    fn kind(&self) -> &'static str {
        match self {
            AppError::SourceUnavailable { .. } => "SourceUnavailable",
            AppError::InvalidRecord { .. } => "InvalidRecord",
            AppError::DuplicateRecord => "DuplicateRecord",
            AppError::Persistence(_) => "PersistenceError",
            AppError::InsufficientData { .. } => "InsufficientData",
            AppError::ModelMissing { .. } => "ModelMissing",
            AppError::FeatureMismatch { .. } => "FeatureMismatch",
            AppError::AqiOutOfRange { .. } => "AQIOutOfRange",
            AppError::Validation { .. } => "Validation",
            AppError::Internal { .. } => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::SourceUnavailable { .. } => StatusCode::BAD_GATEWAY,
            AppError::InvalidRecord { .. } => StatusCode::BAD_REQUEST,
            AppError::DuplicateRecord => StatusCode::OK,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ModelMissing { .. } => StatusCode::NOT_FOUND,
            AppError::FeatureMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::AqiOutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "detail": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        tracing::error!(kind = self.kind(), status = %status, "request failed: {}", self);

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::validation("test").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InsufficientData {
                pollutant: "PM2.5".into(),
                horizon: 24,
                count: 15
            }
            .into_response()
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::ModelMissing {
                pollutant: "PM2.5".into(),
                horizon: 48
            }
            .into_response()
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::internal("test").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_duplicate_record_is_not_an_error_status() {
        assert_eq!(AppError::DuplicateRecord.status(), StatusCode::OK);
    }
}
